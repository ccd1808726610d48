// config.rs
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub port: u16,
    pub host: String,
    pub policy: PolicyConfig,
}

/// Policy values supplied by the platform settings store. The lifecycle core
/// treats these as read-only inputs at call time, never as internal state.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub min_withdrawal: f64,
    pub processing_fee: f64,
    pub request_expiry_hours: i64,
    pub expiry_sweep_interval_secs: u64,
    pub min_return_rate: f64,
    pub max_return_rate: f64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        AppConfig {
            database_url: env::var("DATABASE_URL")
                .expect("DATABASE_URL must be set"),
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "indexvestdb".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .expect("JWT_SECRET must be set"),
            port: env::var("PORT")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .expect("PORT must be a number"),
            host: env::var("HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            policy: PolicyConfig::from_env(),
        }
    }
}

impl PolicyConfig {
    pub fn from_env() -> Self {
        PolicyConfig {
            min_withdrawal: parse_var("MIN_WITHDRAWAL", 100.0),
            processing_fee: parse_var("PROCESSING_FEE", 0.0),
            request_expiry_hours: parse_var("REQUEST_EXPIRY_HOURS", 24),
            expiry_sweep_interval_secs: parse_var("EXPIRY_SWEEP_INTERVAL_SECS", 600),
            min_return_rate: parse_var("MIN_RETURN_RATE", 3.0),
            max_return_rate: parse_var("MAX_RETURN_RATE", 5.0),
        }
    }

    pub fn rate_in_band(&self, rate: f64) -> bool {
        rate >= self.min_return_rate && rate <= self.max_return_rate
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_policy() -> PolicyConfig {
        PolicyConfig {
            min_withdrawal: 100.0,
            processing_fee: 10.0,
            request_expiry_hours: 24,
            expiry_sweep_interval_secs: 600,
            min_return_rate: 3.0,
            max_return_rate: 5.0,
        }
    }

    #[test]
    fn rate_band_is_inclusive() {
        let policy = test_policy();
        assert!(policy.rate_in_band(3.0));
        assert!(policy.rate_in_band(4.0));
        assert!(policy.rate_in_band(5.0));
        assert!(!policy.rate_in_band(2.99));
        assert!(!policy.rate_in_band(5.01));
    }
}
