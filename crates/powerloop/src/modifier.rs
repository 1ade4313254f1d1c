/// A stage that reshapes a commanded speed before it reaches an actuator.
///
/// Modifiers may keep state between calls (a ramp, a filter), so they take
/// `&mut self` and expect to be called once per control cycle.
pub trait SpeedModifier {
    /// Turn the desired speed into the speed to actually command.
    fn modify(&mut self, speed: f64) -> f64;
}

/// Passes speeds through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityModifier;

impl SpeedModifier for IdentityModifier {
    fn modify(&mut self, speed: f64) -> f64 {
        speed
    }
}

impl<M: SpeedModifier + ?Sized> SpeedModifier for Box<M> {
    fn modify(&mut self, speed: f64) -> f64 {
        (**self).modify(speed)
    }
}

impl<M: SpeedModifier + ?Sized> SpeedModifier for &mut M {
    fn modify(&mut self, speed: f64) -> f64 {
        (**self).modify(speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Halve;

    impl SpeedModifier for Halve {
        fn modify(&mut self, speed: f64) -> f64 {
            speed / 2.0
        }
    }

    #[test]
    fn test_identity_passes_through() {
        let mut modifier = IdentityModifier;
        for speed in [-1.0, -0.25, 0.0, 0.7, 1.0] {
            assert_eq!(modifier.modify(speed), speed);
        }
    }

    #[test]
    fn test_boxed_modifier_forwards() {
        let mut modifier: Box<dyn SpeedModifier> = Box::new(Halve);
        assert_eq!(modifier.modify(0.5), 0.25);
    }
}
