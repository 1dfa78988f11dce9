const CONFIG_PATH: &str = "SUPERVISION_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "./config.json";

pub fn get_config_path() -> String {
    std::env::var(CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

const NOTIFY_URL: &str = "SUPERVISION_NOTIFY_URL";

pub fn get_notify_url() -> Option<String> {
    std::env::var(NOTIFY_URL).ok().filter(|url| !url.trim().is_empty())
}

/// Clamp to `[0, 100]`; NaN becomes 0
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// `part / whole × 100`, clamped; a zero `whole` yields 0
pub fn percent_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    clamp_percent(part as f64 / whole as f64 * 100.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn kb_to_mb(kb: f64) -> f64 {
    kb / 1024.0
}

pub fn kb_to_gb(kb: f64) -> f64 {
    kb / (1024.0 * 1024.0)
}
