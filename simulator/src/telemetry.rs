use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One reading as the device firmware posts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub device_id: i64,
    pub date: String,
    pub time: String,
    pub speed: f64,
    pub acc_x: f64,
    pub acc_y: f64,
    pub acc_z: f64,
    pub timestamp: DateTime<Utc>,
}

/// Per-device driving state so consecutive readings look like a trip.
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub device_id: i64,
    speed: f64,
}

impl Vehicle {
    pub fn new(device_id: i64, rng: &mut impl Rng) -> Self {
        Self {
            device_id,
            speed: rng.gen_range(20.0..70.0),
        }
    }

    pub fn next_reading(&mut self, rng: &mut impl Rng, now: DateTime<Utc>) -> Telemetry {
        let acc_x = if rng.gen_bool(0.03) {
            rng.gen_range(3.0..6.0) * if rng.gen_bool(0.5) { 1.0 } else { -1.0 } // harsh event
        } else {
            rng.gen_range(-1.5..1.5)
        };

        // Speed follows longitudinal acceleration, km/h per reading.
        self.speed = (self.speed + acc_x * 3.6).clamp(0.0, 160.0);
        if rng.gen_bool(0.02) {
            self.speed = rng.gen_range(80.0..130.0); // 2% speeding bursts
        }

        Telemetry {
            device_id: self.device_id,
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M:%S").to_string(),
            speed: (self.speed * 10.0).round() / 10.0,
            acc_x,
            acc_y: rng.gen_range(-1.0..1.0),
            acc_z: rng.gen_range(-0.5..0.5),
            timestamp: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_readings_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut vehicle = Vehicle::new(12345, &mut rng);

        for _ in 0..1000 {
            let t = vehicle.next_reading(&mut rng, Utc::now());
            assert_eq!(t.device_id, 12345);
            assert!((0.0..=160.0).contains(&t.speed));
            assert!(t.acc_x.abs() <= 6.0);
        }
    }

    #[test]
    fn test_wire_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut vehicle = Vehicle::new(1, &mut rng);
        let value = serde_json::to_value(vehicle.next_reading(&mut rng, Utc::now())).unwrap();

        for key in ["deviceId", "date", "time", "speed", "accX", "accY", "accZ", "timestamp"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(value["time"].as_str().unwrap().len(), 8);
    }
}
