//! Resource limit parsing and host-capacity fitting

use std::sync::LazyLock;

use regex::Regex;
use sandcheck_errors::AssessmentError;
use sandcheck_types::ResourceLimitSpec;
use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Fixed CFS period the CPU quota is expressed against, in microseconds
pub const CPU_PERIOD_US: u64 = 100_000;

static QUANTITY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)([kmg]?)$").ok());

/// Runtime-native limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub memory_bytes: u64,
    pub cpu_quota: u64,
    pub cpu_period: u64,
    pub disk_bytes: u64,
}

impl ResourceQuota {
    /// Requested CPUs as a fraction of the period.
    #[must_use]
    pub fn cpus(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let cpus = self.cpu_quota as f64 / self.cpu_period as f64;
        cpus
    }
}

fn malformed(field: &str, value: &str) -> AssessmentError {
    AssessmentError::configuration(format!("invalid {field} limit '{value}'"))
        .with_context("field", field)
        .with_context("value", value)
}

/// Parse `"512m"`, `"2G"`, `"1024"` into bytes.
///
/// # Errors
///
/// Returns a configuration error for malformed, zero or overflowing values.
pub fn parse_quantity(field: &str, value: &str) -> Result<u64, AssessmentError> {
    let re = QUANTITY
        .as_ref()
        .ok_or_else(|| AssessmentError::configuration("quantity pattern failed to compile"))?;
    let caps = re
        .captures(value.trim())
        .ok_or_else(|| malformed(field, value))?;
    let amount: u64 = caps[1].parse().map_err(|_| malformed(field, value))?;
    let multiplier: u64 = match caps[2].to_ascii_lowercase().as_str() {
        "k" => 1 << 10,
        "m" => 1 << 20,
        "g" => 1 << 30,
        _ => 1,
    };
    let bytes = amount
        .checked_mul(multiplier)
        .ok_or_else(|| malformed(field, value))?;
    if bytes == 0 {
        return Err(malformed(field, value));
    }
    Ok(bytes)
}

/// Parse a decimal CPU count into a quota against [`CPU_PERIOD_US`].
///
/// # Errors
///
/// Returns a configuration error unless the value is a positive finite
/// number yielding a non-zero quota.
pub fn parse_cpu(value: &str) -> Result<u64, AssessmentError> {
    let cpus: f64 = value
        .trim()
        .parse()
        .map_err(|_| malformed("cpu", value))?;
    if !cpus.is_finite() || cpus <= 0.0 || cpus > 1024.0 {
        return Err(malformed("cpu", value));
    }
    #[allow(clippy::cast_precision_loss)]
    let period = CPU_PERIOD_US as f64;
    // Bounded above, so the cast cannot truncate
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let quota = (cpus * period).round() as u64;
    if quota == 0 {
        return Err(malformed("cpu", value));
    }
    Ok(quota)
}

/// Translate human units into runtime quotas.
///
/// # Errors
///
/// Returns a configuration error naming the first malformed limit.
pub fn translate_limits(spec: &ResourceLimitSpec) -> Result<ResourceQuota, AssessmentError> {
    Ok(ResourceQuota {
        memory_bytes: parse_quantity("memory", &spec.memory)?,
        cpu_quota: parse_cpu(&spec.cpu)?,
        cpu_period: CPU_PERIOD_US,
        disk_bytes: parse_quantity("diskSpace", &spec.disk_space)?,
    })
}

/// What the host can offer right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapacity {
    pub available_memory_bytes: u64,
    pub cpus: u32,
}

impl HostCapacity {
    /// Sample memory and CPU count from the running host.
    #[must_use]
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_all();
        let cpus = u32::try_from(sys.cpus().len()).unwrap_or(u32::MAX).max(1);
        Self {
            available_memory_bytes: sys.available_memory(),
            cpus,
        }
    }
}

/// A limit that had to be lowered to fit the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitDegradation {
    pub resource: String,
    pub requested: u64,
    pub granted: u64,
}

/// Cap `quota` at `percent` of what `host` has available.
///
/// Unknown capacity (zero) leaves the request untouched.
#[must_use]
pub fn fit_to_host(
    quota: ResourceQuota,
    host: HostCapacity,
    percent: u8,
) -> (ResourceQuota, Vec<LimitDegradation>) {
    let percent = u64::from(percent.min(100));
    let mut fitted = quota;
    let mut degraded = Vec::new();

    if host.available_memory_bytes > 0 && quota.memory_bytes > host.available_memory_bytes {
        let granted = (host.available_memory_bytes / 100).saturating_mul(percent).max(1);
        degraded.push(LimitDegradation {
            resource: "memory".to_string(),
            requested: quota.memory_bytes,
            granted,
        });
        fitted.memory_bytes = granted;
    }

    let host_quota = u64::from(host.cpus) * quota.cpu_period;
    if host_quota > 0 && quota.cpu_quota > host_quota {
        let granted = (host_quota / 100).saturating_mul(percent).max(1);
        degraded.push(LimitDegradation {
            resource: "cpu".to_string(),
            requested: quota.cpu_quota,
            granted,
        });
        fitted.cpu_quota = granted;
    }

    (fitted, degraded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sandcheck_errors::ErrorFamily;

    #[test]
    fn parses_units() {
        assert_eq!(parse_quantity("memory", "512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_quantity("memory", "2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_quantity("memory", "1024").unwrap(), 1024);
        assert_eq!(parse_cpu("0.5").unwrap(), 50_000);
        assert_eq!(parse_cpu("2").unwrap(), 200_000);
    }

    #[test]
    fn rejects_malformed_values() {
        for bad in ["", "0", "12x", "-1m", "1.5g", "m", "99999999999999999999g"] {
            let err = parse_quantity("memory", bad).unwrap_err();
            assert_eq!(err.family(), ErrorFamily::Configuration, "{bad}");
            assert_eq!(err.context_value("field"), Some("memory"));
        }
        for bad in ["0", "-0.5", "abc", "NaN", "inf", "0.000001"] {
            assert!(parse_cpu(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn degrades_to_eighty_percent_of_host() {
        let quota = translate_limits(&ResourceLimitSpec {
            cpu: "8".into(),
            memory: "16g".into(),
            disk_space: "1g".into(),
        })
        .unwrap();
        let host = HostCapacity {
            available_memory_bytes: 4 << 30,
            cpus: 2,
        };
        let (fitted, degraded) = fit_to_host(quota, host, 80);
        assert_eq!(degraded.len(), 2);
        assert!(fitted.memory_bytes <= (4u64 << 30) / 100 * 80);
        assert_eq!(fitted.cpu_quota, 160_000);
        assert_eq!(fitted.disk_bytes, 1 << 30);
    }

    #[test]
    fn requests_within_capacity_are_untouched() {
        let quota = translate_limits(&ResourceLimitSpec::default()).unwrap();
        let host = HostCapacity {
            available_memory_bytes: 64 << 30,
            cpus: 16,
        };
        let (fitted, degraded) = fit_to_host(quota, host, 80);
        assert!(degraded.is_empty());
        assert_eq!(fitted, quota);
    }

    proptest! {
        #[test]
        fn quantity_parsing_is_monotonic(n in 1u64..1_000_000, unit in prop::sample::select(vec!["", "k", "m", "g"])) {
            let a = parse_quantity("memory", &format!("{n}{unit}")).unwrap();
            let b = parse_quantity("memory", &format!("{}{unit}", n + 1)).unwrap();
            prop_assert!(a < b);
        }

        #[test]
        fn larger_units_yield_larger_quotas(n in 1u64..1_000_000) {
            let bytes = parse_quantity("memory", &n.to_string()).unwrap();
            let kib = parse_quantity("memory", &format!("{n}k")).unwrap();
            let mib = parse_quantity("memory", &format!("{n}m")).unwrap();
            let gib = parse_quantity("memory", &format!("{n}g")).unwrap();
            prop_assert!(bytes < kib && kib < mib && mib < gib);
        }

        #[test]
        fn garbage_is_a_configuration_error(s in "[a-z!@#. ]{1,8}") {
            let result = parse_quantity("memory", &s);
            prop_assert!(result.is_err());
        }
    }
}
