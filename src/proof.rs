//! Proof-of-payment artifacts rendered as QR codes.

use async_trait::async_trait;
use qrcode::render::svg;
use qrcode::QrCode;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::PaymentError;
use crate::ports::{ProofArtifactGenerator, ProofPayload};

pub const PROOF_SUBDIR: &str = "proofs";

/// Writes `proofs/{transaction_id}.svg` under a configured root directory.
#[derive(Debug, Clone)]
pub struct QrProofGenerator {
    root: PathBuf,
}

impl QrProofGenerator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn relative_path(transaction_id: Uuid) -> String {
        format!("{}/{}.svg", PROOF_SUBDIR, transaction_id)
    }
}

/// Renders the payload as an SVG QR code.
pub fn render_svg(payload: &ProofPayload) -> Result<String, PaymentError> {
    let data = serde_json::to_vec(payload)
        .map_err(|e| PaymentError::ProofGenerationFailed(e.to_string()))?;
    let code =
        QrCode::new(data).map_err(|e| PaymentError::ProofGenerationFailed(e.to_string()))?;

    Ok(code
        .render::<svg::Color>()
        .min_dimensions(200, 200)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build())
}

#[async_trait]
impl ProofArtifactGenerator for QrProofGenerator {
    async fn generate(
        &self,
        transaction_id: Uuid,
        payload: &ProofPayload,
    ) -> Result<String, PaymentError> {
        let image = render_svg(payload)?;
        let relative = Self::relative_path(transaction_id);
        let target = self.root.join(&relative);
        let staging = self
            .root
            .join(PROOF_SUBDIR)
            .join(format!(".{}.{}.svg.tmp", transaction_id, Uuid::new_v4().simple()));

        let io_err = |e: std::io::Error| PaymentError::ProofGenerationFailed(e.to_string());
        tokio::fs::create_dir_all(self.root.join(PROOF_SUBDIR))
            .await
            .map_err(io_err)?;
        tokio::fs::write(&staging, image).await.map_err(io_err)?;
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_err(e));
        }

        tracing::debug!(%transaction_id, path = %relative, "Proof artifact written");
        Ok(relative)
    }
}
