use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, matching the header timestamp fields.
pub fn unix_time_f64() -> f64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_plausible_unix_time() {
        let t = unix_time_f64();
        assert!(t > 1_700_000_000.0);
    }
}
