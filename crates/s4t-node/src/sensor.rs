use rand::Rng;

/// Source of sensor samples, in the text form they are sent as.
pub trait Sensor: Send + Sync + 'static {
    fn sample(&self) -> String;
}

/// Three random decimal digits, 0 to 999. Stands in for real hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSensor;

impl Sensor for RandomSensor {
    fn sample(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..3)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }
}

/// Always returns the same value.
#[derive(Debug, Clone, Copy)]
pub struct FixedSensor(pub f64);

impl Sensor for FixedSensor {
    fn sample(&self) -> String {
        self.0.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_sensor_range() {
        for _ in 0..1000 {
            let sample = RandomSensor.sample();
            assert_eq!(sample.len(), 3);
            assert!(sample.bytes().all(|b| b.is_ascii_digit()));
        }
        assert_eq!(FixedSensor(7.0).sample(), "7");
    }
}
