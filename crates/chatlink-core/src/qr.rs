//! QR rendering for the authentication side channel
//!
//! The terminal rendering is what an operator scans from the service logs; the
//! SVG data URL is what an HTTP front end embeds in an `<img>` tag.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use qrcode::render::{svg, unicode};
use qrcode::QrCode as Matrix;

use crate::types::QrCode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QrRenderError {
    #[error("QR payload cannot be encoded: {reason}")]
    Encode { reason: String },
}

impl QrCode {
    fn matrix(&self) -> Result<Matrix, QrRenderError> {
        Matrix::new(self.as_str().as_bytes()).map_err(|e| QrRenderError::Encode {
            reason: e.to_string(),
        })
    }

    /// Compact half-block rendering suitable for a terminal
    pub fn render_terminal(&self) -> Result<String, QrRenderError> {
        let matrix = self.matrix()?;
        Ok(matrix
            .render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .quiet_zone(true)
            .build())
    }

    /// `data:image/svg+xml;base64,...` URL of the code
    pub fn to_svg_data_url(&self) -> Result<String, QrRenderError> {
        let matrix = self.matrix()?;
        let image = matrix
            .render::<svg::Color<'_>>()
            .min_dimensions(200, 200)
            .build();
        Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
    }
}
