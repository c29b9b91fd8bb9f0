use base64::{engine::general_purpose::STANDARD, Engine as _};
use chatmirror_core::{SyncError, SyncResult};
use qrcode::{render::svg, QrCode};

const DATA_URL_PREFIX: &str = "data:image/svg+xml;base64,";

/// Renders a QR payload to an SVG data URL clients can drop into an `<img>`.
pub fn render_qr_data_url(payload: &str) -> SyncResult<String> {
    let code = QrCode::new(payload.as_bytes())
        .map_err(|e| SyncError::Validation(format!("QR payload cannot be encoded: {e}")))?;

    let image = code
        .render::<svg::Color>()
        .min_dimensions(256, 256)
        .quiet_zone(true)
        .build();

    Ok(format!("{DATA_URL_PREFIX}{}", STANDARD.encode(image)))
}
