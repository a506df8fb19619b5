//! Network isolation planning and host validation

use std::net::IpAddr;

use sandcheck_errors::AssessmentError;
use sandcheck_types::{EnvironmentId, SecurityConfiguration};
use sandcheck_runtime::NetworkMode;
use serde::{Deserialize, Serialize};

/// Hosts that must never be reachable from an analysis container
const SENSITIVE_HOSTS: &[&str] = &[
    "169.254.169.254",
    "169.254.170.2",
    "100.100.100.200",
    "fd00:ec2::254",
    "metadata",
    "metadata.google.internal",
    "metadata.azure.com",
    "instance-data",
    "instance-data.ec2.internal",
    "localhost",
    "localhost.localdomain",
    "0.0.0.0",
    "::",
    "*",
];

/// How an environment reaches the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NetworkPlan {
    /// No network at all
    Isolated,
    /// Dedicated internal network; egress only to `allowed_hosts` through
    /// the controlled proxy
    Restricted {
        network: String,
        allowed_hosts: Vec<String>,
    },
    /// Isolation disabled by the caller
    Open,
}

impl NetworkPlan {
    #[must_use]
    pub fn mode(&self) -> NetworkMode {
        match self {
            Self::Isolated => NetworkMode::None,
            Self::Restricted { network, .. } => NetworkMode::Restricted(network.clone()),
            Self::Open => NetworkMode::Bridge,
        }
    }

    /// Dedicated network the lifecycle manager has to create.
    #[must_use]
    pub fn dedicated_network(&self) -> Option<&str> {
        match self {
            Self::Restricted { network, .. } => Some(network),
            _ => None,
        }
    }
}

fn is_sensitive_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Check one allow-list entry: a hostname, an IP literal, or `*.` followed
/// by a hostname.
///
/// # Errors
///
/// Returns a configuration error for a syntactically invalid entry and a
/// network security violation for a sensitive target.
pub fn validate_host(pattern: &str, extra_sensitive: &[String]) -> Result<(), AssessmentError> {
    let host = pattern.trim().trim_end_matches('.').to_ascii_lowercase();
    let sensitive = || {
        AssessmentError::network_violation(format!("'{pattern}' is a sensitive network target"))
            .with_context("host", pattern)
    };

    if SENSITIVE_HOSTS.contains(&host.as_str()) || extra_sensitive.iter().any(|h| h.eq_ignore_ascii_case(&host)) {
        return Err(sensitive());
    }
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return if is_sensitive_ip(ip) { Err(sensitive()) } else { Ok(()) };
    }

    let name = host.strip_prefix("*.").unwrap_or(&host);
    let valid = !name.is_empty() && name.len() <= 253 && name.split('.').all(is_valid_label);
    if !valid {
        return Err(
            AssessmentError::configuration(format!("invalid host pattern '{pattern}'"))
                .with_context("field", "allowedNetworkAccess")
                .with_context("host", pattern),
        );
    }
    if name.ends_with(".localhost") || (name.starts_with("metadata.") && name.ends_with(".internal")) {
        return Err(sensitive());
    }
    Ok(())
}

/// Decide the network plan for a new environment.
///
/// # Errors
///
/// Returns the first allow-list entry that fails [`validate_host`].
pub fn plan_network(
    environment_id: &EnvironmentId,
    security: &SecurityConfiguration,
    network_prefix: &str,
    extra_sensitive: &[String],
) -> Result<NetworkPlan, AssessmentError> {
    for host in &security.allowed_network_access {
        validate_host(host, extra_sensitive)?;
    }
    if !security.network_isolation {
        return Ok(NetworkPlan::Open);
    }
    if security.allowed_network_access.is_empty() {
        return Ok(NetworkPlan::Isolated);
    }
    Ok(NetworkPlan::Restricted {
        network: format!("{network_prefix}-{environment_id}"),
        allowed_hosts: security.allowed_network_access.iter().cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandcheck_errors::{ErrorFamily, ViolationKind};

    #[test]
    fn accepts_ordinary_hosts() {
        for host in ["registry.npmjs.org", "*.github.com", "10.1.2.3", "api.example.com."] {
            validate_host(host, &[]).unwrap();
        }
    }

    #[test]
    fn rejects_sensitive_targets() {
        for host in [
            "169.254.169.254",
            "metadata.google.internal",
            "localhost",
            "127.0.0.1",
            "[::1]",
            "169.254.10.10",
            "fe80::1",
            "0.0.0.0",
            "*",
            "app.localhost",
        ] {
            let err = validate_host(host, &[]).unwrap_err();
            assert_eq!(err.family(), ErrorFamily::Security, "{host}");
            assert!(matches!(
                err.kind,
                sandcheck_errors::ErrorKind::SecurityViolation {
                    violation: ViolationKind::Network
                }
            ));
        }
        assert!(validate_host("vault.corp", &["vault.corp".to_string()]).is_err());
    }

    #[test]
    fn rejects_malformed_hostnames() {
        for host in ["bad host", "-lead.example", "exa_mple.com", "a..b", "*.bad_host", ""] {
            let err = validate_host(host, &[]).unwrap_err();
            assert_eq!(err.family(), ErrorFamily::Configuration, "{host:?}");
        }
    }

    #[test]
    fn plans_follow_isolation_settings() {
        let id = EnvironmentId::from("env-1");
        let isolated = SecurityConfiguration::default();
        assert_eq!(plan_network(&id, &isolated, "net", &[]).unwrap(), NetworkPlan::Isolated);

        let allowed = SecurityConfiguration::default().allow_host("registry.npmjs.org");
        let plan = plan_network(&id, &allowed, "net", &[]).unwrap();
        assert_eq!(plan.dedicated_network(), Some("net-env-1"));
        assert_eq!(plan.mode(), NetworkMode::Restricted("net-env-1".into()));

        let open = SecurityConfiguration {
            network_isolation: false,
            ..SecurityConfiguration::default()
        };
        assert_eq!(plan_network(&id, &open, "net", &[]).unwrap().mode(), NetworkMode::Bridge);
    }
}
