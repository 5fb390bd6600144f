use std::path::PathBuf;

use tokio::process::Command;
use tracing::debug;

use crate::error::CertError;

/// How to invoke the external signing collaborator (§6.3): working directory
/// is the certificate directory, the command is run with the normalised host
/// as its sole argument, and a non-zero exit is fatal for that request.
#[derive(Clone, Debug)]
pub struct SignerConfig {
	pub cert_dir: PathBuf,
	pub script: PathBuf,
}

impl SignerConfig {
	pub fn new(cert_dir: PathBuf, script: PathBuf) -> Self {
		Self { cert_dir, script }
	}

	pub async fn invoke(&self, host: &str) -> Result<(), CertError> {
		debug!(host, script = %self.script.display(), "invoking certificate signer");
		let output = Command::new(&self.script)
			.arg(host)
			.current_dir(&self.cert_dir)
			.output()
			.await?;

		if !output.status.success() {
			return Err(CertError::SignerFailed {
				host: host.to_string(),
				detail: format!(
					"exit status {}: {}",
					output.status,
					String::from_utf8_lossy(&output.stderr).trim()
				),
			});
		}
		Ok(())
	}
}
