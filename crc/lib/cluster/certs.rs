use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tokio_util::sync::CancellationToken;

use super::{Oc, RetryPolicy, SystemdCommander};
use crate::{ssh::Runner, CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const CERT_EXPIRY_DATE_COMMAND: &str = r#"date --date="$(sudo openssl x509 -in /var/lib/kubelet/pki/kubelet-client-current.pem -noout -enddate | cut -d= -f 2)" --iso-8601=seconds"#;

const PENDING_CSR_JSONPATH: &str = "-ojsonpath='{range .items[?(@.status == {})]}{.metadata.name}{\"\\n\"}{end}'";

/// Upper bound of the renewal flow.
pub const CERT_RENEWAL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Validity of the kubelet client certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertExpiryState {
    /// The expiry date could not be read.
    Unknown,

    /// The certificate is still valid.
    NotExpired,

    /// The certificate has expired.
    Expired,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads the kubelet client certificate expiry date inside the guest.
pub async fn check_certs_validity(runner: &dyn Runner) -> (CertExpiryState, Option<CrcError>) {
    let output = match runner.run(CERT_EXPIRY_DATE_COMMAND).await {
        Ok(output) => output,
        Err(e) => return (CertExpiryState::Unknown, Some(e)),
    };

    match parse_expiry_date(&output) {
        Ok(expiry) => expiry_state(expiry, Utc::now()),
        Err(e) => (CertExpiryState::Unknown, Some(e)),
    }
}

/// Approves every pending certificate signing request.
pub async fn approve_node_csr(oc: Oc<'_>) -> CrcResult<usize> {
    let output = oc.run(&["get", "csr", PENDING_CSR_JSONPATH]).await?;
    let pending: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();

    if pending.is_empty() {
        return Ok(0);
    }

    tracing::debug!("approving pending CSRs: {}", pending.join(", "));
    let mut args = vec!["adm", "certificate", "approve"];
    args.extend(pending.iter().copied());
    oc.run(&args).await?;
    Ok(pending.len())
}

/// Starts the kubelet and approves its CSRs until a valid client certificate is issued.
///
/// The flow gives up after attempts of `retry` and is capped at [`CERT_RENEWAL_TIMEOUT`].
pub async fn regenerate_certificates(
    runner: &dyn Runner,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> CrcResult<()> {
    SystemdCommander::new(runner).start("kubelet").await?;

    let renewal = retry.run(cancel, || async move {
        approve_node_csr(Oc::new(runner))
            .await
            .map_err(CrcError::retriable)?;

        match check_certs_validity(runner).await {
            (CertExpiryState::NotExpired, _) => Ok(()),
            (state, error) => Err(CrcError::retriable(CrcError::Cluster(match error {
                Some(e) => format!("certificate state {state:?}: {e}"),
                None => format!("certificate state {state:?}"),
            }))),
        }
    });

    match tokio::time::timeout(CERT_RENEWAL_TIMEOUT, renewal).await {
        Ok(result) => result.map_err(|e| match e {
            CrcError::Cancelled => e,
            other => CrcError::CertificateRenewal(other.to_string()),
        }),
        Err(_) => Err(CrcError::CertificateRenewal(format!(
            "certificate renewal did not finish within {} minutes",
            CERT_RENEWAL_TIMEOUT.as_secs() / 60
        ))),
    }
}

fn parse_expiry_date(output: &str) -> CrcResult<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(output.trim()).map_err(|e| {
        CrcError::Cluster(format!(
            "cannot parse certificate expiry date '{}': {e}",
            output.trim()
        ))
    })
}

fn expiry_state(
    expiry: DateTime<FixedOffset>,
    now: DateTime<Utc>,
) -> (CertExpiryState, Option<CrcError>) {
    if expiry < now {
        return (
            CertExpiryState::Expired,
            Some(CrcError::Cluster(format!(
                "certs have expired, they were valid till: {}",
                expiry.to_rfc2822()
            ))),
        );
    }

    (CertExpiryState::NotExpired, None)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
