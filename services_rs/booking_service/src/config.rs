use regex::Regex;
use safar_common::secret_policy;
use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub env_name: String,
    pub env_lower: String,

    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,

    pub allowed_origins: Vec<String>,

    pub require_internal_secret: bool,
    pub internal_secret: Option<String>,
    pub internal_allowed_callers: Vec<String>,

    pub gateway_base_url: String,
    pub gateway_client_id: String,
    pub gateway_client_secret: String,
    pub gateway_api_version: String,
    pub gateway_provider: String,

    pub currency: String,
    pub hold_expiry_minutes: i64,
    pub sweep_interval_seconds: u64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        }
        Err(_) => None,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_required_bool_like(raw: &str) -> Option<bool> {
    let v = raw.trim().to_lowercase();
    if v.is_empty() {
        return None;
    }
    if matches!(v.as_str(), "0" | "false" | "no" | "off") {
        Some(false)
    } else {
        Some(true)
    }
}

fn validate_http_url(key: &str, url: &str) -> Result<(), String> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(format!("{key} must be an http(s) URL"))
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let env_name = env_or("ENV", "dev");
        let env_lower = env_name.trim().to_lowercase();
        let prod_like = matches!(env_lower.as_str(), "prod" | "production" | "staging");

        let host = env_or("APP_HOST", "0.0.0.0");
        let port: u16 = env_or("APP_PORT", "8084")
            .parse()
            .map_err(|_| "APP_PORT must be a valid u16".to_string())?;

        let max_body_bytes: usize = env_or("BOOKING_MAX_BODY_BYTES", "1048576")
            .parse()
            .map_err(|_| "BOOKING_MAX_BODY_BYTES must be an integer".to_string())?;
        let max_body_bytes = max_body_bytes.clamp(16 * 1024, 10 * 1024 * 1024);

        let mut allowed_origins = parse_csv(&env_or("ALLOWED_ORIGINS", ""));
        if allowed_origins.is_empty() {
            // Safe local default for development.
            allowed_origins = vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ];
        }
        if prod_like && allowed_origins.iter().any(|o| o.trim() == "*") {
            return Err("ALLOWED_ORIGINS must not contain '*' in prod/staging".to_string());
        }
        if prod_like
            && allowed_origins
                .iter()
                .any(|o| !o.trim().starts_with("https://"))
        {
            return Err("ALLOWED_ORIGINS must use https:// origins in prod/staging".to_string());
        }

        let require_internal_secret = {
            let raw = env_or("BOOKING_REQUIRE_INTERNAL_SECRET", "");
            match parse_required_bool_like(&raw) {
                Some(v) => v,
                None => prod_like,
            }
        };
        if prod_like && !require_internal_secret {
            return Err(
                "BOOKING_REQUIRE_INTERNAL_SECRET must be true in prod/staging".to_string(),
            );
        }

        let internal_secret = env_opt("BOOKING_INTERNAL_SECRET");
        if require_internal_secret && internal_secret.as_deref().unwrap_or("").is_empty() {
            return Err(
                "BOOKING_INTERNAL_SECRET must be set when BOOKING_REQUIRE_INTERNAL_SECRET is enabled"
                    .to_string(),
            );
        }
        secret_policy::enforce_value_policy_for_env(
            &env_name,
            "BOOKING_INTERNAL_SECRET",
            internal_secret.as_deref(),
            false,
        )?;

        let internal_allowed_callers = parse_csv(&env_or("BOOKING_INTERNAL_ALLOWED_CALLERS", ""))
            .into_iter()
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>();

        let gateway_base_url = env_or("GATEWAY_BASE_URL", "https://sandbox.cashfree.com");
        validate_http_url("GATEWAY_BASE_URL", &gateway_base_url)?;
        if prod_like && !gateway_base_url.starts_with("https://") {
            return Err("GATEWAY_BASE_URL must be https:// in prod/staging".to_string());
        }

        let gateway_client_id = env_or("GATEWAY_CLIENT_ID", "cf-app-dev");
        if prod_like && env_opt("GATEWAY_CLIENT_ID").is_none() {
            return Err("GATEWAY_CLIENT_ID must be set in prod/staging".to_string());
        }
        let gateway_client_secret = env_or("GATEWAY_CLIENT_SECRET", "change-me-gateway");
        secret_policy::enforce_value_policy_for_env(
            &env_name,
            "GATEWAY_CLIENT_SECRET",
            env_opt("GATEWAY_CLIENT_SECRET").as_deref(),
            true,
        )?;

        let gateway_api_version = env_or("GATEWAY_API_VERSION", "2022-09-01");
        let gateway_provider = env_or("GATEWAY_PROVIDER", "cashfree")
            .trim()
            .to_ascii_lowercase();
        let provider_re = Regex::new(r"^[a-z0-9_-]{1,32}$").map_err(|e| e.to_string())?;
        if !provider_re.is_match(&gateway_provider) {
            return Err("GATEWAY_PROVIDER must match ^[a-z0-9_-]{1,32}$".to_string());
        }

        let currency = env_or("BOOKING_CURRENCY", "INR").trim().to_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err("BOOKING_CURRENCY must be a 3-letter code".to_string());
        }

        let hold_expiry_minutes: i64 = env_or("BOOKING_HOLD_EXPIRY_MINUTES", "15")
            .parse()
            .map_err(|_| "BOOKING_HOLD_EXPIRY_MINUTES must be an integer".to_string())?;
        let hold_expiry_minutes = hold_expiry_minutes.clamp(1, 120);

        let sweep_interval_seconds: u64 = env_or("BOOKING_SWEEP_INTERVAL_SECONDS", "60")
            .parse()
            .map_err(|_| "BOOKING_SWEEP_INTERVAL_SECONDS must be an integer".to_string())?;

        Ok(Self {
            env_name,
            env_lower,
            host,
            port,
            max_body_bytes,
            allowed_origins,
            require_internal_secret,
            internal_secret,
            internal_allowed_callers,
            gateway_base_url,
            gateway_client_id,
            gateway_client_secret,
            gateway_api_version,
            gateway_provider,
            currency,
            hold_expiry_minutes,
            sweep_interval_seconds,
        })
    }
}
