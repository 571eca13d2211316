/// Centralized environment-variable parsing helpers.
///
/// Every tuning knob read from the environment goes through these helpers
/// so the truthy/falsey parsing lives in one place.

/// Returns `true` when the environment variable is set to a truthy value
/// (`1`, `true`, `yes`, or `on`, case-insensitive, trimmed).
#[inline]
pub(crate) fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| parse_truthy(&raw))
        .unwrap_or(false)
}

/// Parses the environment variable as a `u64`, returning `Some` only when
/// the value is a valid positive (> 0) integer.
#[inline]
pub(crate) fn env_var_positive_u64(var_name: &str) -> Option<u64> {
    std::env::var(var_name)
        .ok()
        .and_then(|raw| parse_positive_u64(&raw))
}

/// Parses the environment variable as a finite, strictly positive `f32`.
#[inline]
pub(crate) fn env_var_positive_f32(var_name: &str) -> Option<f32> {
    std::env::var(var_name)
        .ok()
        .and_then(|raw| parse_positive_f32(&raw))
}

/// Parses a comma separated list of output indices (`"0, 2"`). Returns
/// `None` when the variable is unset or any entry fails to parse.
pub(crate) fn env_var_u32_list(var_name: &str) -> Option<Vec<u32>> {
    std::env::var(var_name)
        .ok()
        .and_then(|raw| parse_u32_list(&raw))
}

fn parse_truthy(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
}

fn parse_positive_u64(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}

fn parse_positive_f32(raw: &str) -> Option<f32> {
    raw.trim()
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0)
}

fn parse_u32_list(raw: &str) -> Option<Vec<u32>> {
    let list = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    (!list.is_empty()).then_some(list)
}

/// Declares a cached boolean feature flag backed by a `OnceLock<bool>`.
///
/// `enabled_when(fn_name, "ENV_VAR")` returns `true` only when the env var
/// is truthy (off by default).
#[cfg_attr(not(target_os = "windows"), allow(unused_macros))]
macro_rules! define_env_flag {
    (enabled_when($fn_name:ident, $var:expr)) => {
        #[inline]
        fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| $crate::env_config::env_var_truthy($var))
        }
    };
}

#[cfg_attr(not(target_os = "windows"), allow(unused_imports))]
pub(crate) use define_env_flag;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        for raw in ["1", "true", " YES ", "On"] {
            assert!(parse_truthy(raw), "{raw}");
        }
        for raw in ["0", "false", "", "enabled"] {
            assert!(!parse_truthy(raw), "{raw}");
        }
    }

    #[test]
    fn positive_numbers_reject_zero_and_garbage() {
        assert_eq!(parse_positive_u64(" 250 "), Some(250));
        assert_eq!(parse_positive_u64("0"), None);
        assert_eq!(parse_positive_u64("-3"), None);
        assert_eq!(parse_positive_f32("1.5"), Some(1.5));
        assert_eq!(parse_positive_f32("0"), None);
        assert_eq!(parse_positive_f32("NaN"), None);
    }

    #[test]
    fn output_lists() {
        assert_eq!(parse_u32_list("0, 2,1"), Some(vec![0, 2, 1]));
        assert_eq!(parse_u32_list(" 3 "), Some(vec![3]));
        assert_eq!(parse_u32_list(""), None);
        assert_eq!(parse_u32_list("0,x"), None);
    }
}
