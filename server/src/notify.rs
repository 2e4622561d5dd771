//! Outbound ticket email.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{GrayImage, ImageFormat, Luma};
use qrcode::{Color, QrCode};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

/// Pixels per QR module and white border width, in modules.
const QR_MODULE_PX: u32 = 8;
const QR_QUIET_ZONE: u32 = 4;
const QR_FILENAME: &str = "qr.png";
const PNG_CONTENT_TYPE: &str = "image/png";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub recipient: String,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<EmailAttachment>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("email request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("email provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("could not render email: {0}")]
    Render(String),
}

/// Delivers rendered messages. Returns the provider's message id.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<String, NotifyError>;
}

/// Sends through the Resend HTTP API.
#[derive(Clone)]
pub struct ResendNotifier {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendNotifier {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }
}

#[derive(Serialize)]
struct ResendAttachment<'a> {
    filename: &'a str,
    /// Base64 of the file bytes.
    content: String,
    content_type: &'a str,
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<ResendAttachment<'a>>,
}

impl<'a> ResendRequest<'a> {
    fn new(from: &'a str, message: &'a EmailMessage) -> Self {
        Self {
            from,
            to: [&message.recipient],
            subject: &message.subject,
            html: &message.html,
            attachments: message
                .attachments
                .iter()
                .map(|attachment| ResendAttachment {
                    filename: &attachment.filename,
                    content: STANDARD.encode(&attachment.content),
                    content_type: &attachment.content_type,
                })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct ResendResponse {
    id: String,
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send(&self, message: EmailMessage) -> Result<String, NotifyError> {
        let response = self
            .client
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&ResendRequest::new(&self.from, &message))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let sent: ResendResponse = response.json().await?;
        Ok(sent.id)
    }
}

/// Used when no provider key is configured: logs instead of sending.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: EmailMessage) -> Result<String, NotifyError> {
        tracing::info!(
            recipient = %message.recipient,
            subject = %message.subject,
            attachments = message.attachments.len(),
            "Email provider not configured, message not sent"
        );
        Ok(String::new())
    }
}

/// Encodes `data` as a black-on-white QR code PNG.
pub fn render_qr_png(data: &str) -> Result<Vec<u8>, NotifyError> {
    let code = QrCode::new(data.as_bytes()).map_err(|e| NotifyError::Render(e.to_string()))?;
    let width = code.width() as u32;
    let colors = code.to_colors();
    let side = (width + 2 * QR_QUIET_ZONE) * QR_MODULE_PX;

    let image = GrayImage::from_fn(side, side, |x, y| {
        let module_x = (x / QR_MODULE_PX).checked_sub(QR_QUIET_ZONE);
        let module_y = (y / QR_MODULE_PX).checked_sub(QR_QUIET_ZONE);
        match (module_x, module_y) {
            (Some(mx), Some(my))
                if mx < width && my < width && colors[(my * width + mx) as usize] == Color::Dark =>
            {
                Luma([0u8])
            }
            _ => Luma([255u8]),
        }
    });

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| NotifyError::Render(e.to_string()))?;
    Ok(png)
}

/// Builds the ticket email: the redeem link, the QR inline and the same QR
/// as a `qr.png` attachment.
pub fn render_ticket_email(
    recipient: &str,
    event_name: Option<&str>,
    redeem_url: &str,
) -> Result<EmailMessage, NotifyError> {
    let nombre = event_name.unwrap_or("la salida");
    let titulo = html_escape::encode_text(nombre);
    let url = html_escape::encode_double_quoted_attribute(redeem_url);

    let qr = render_qr_png(redeem_url)?;
    let qr_data_url = format!("data:{PNG_CONTENT_TYPE};base64,{}", STANDARD.encode(&qr));

    Ok(EmailMessage {
        recipient: recipient.to_string(),
        subject: format!("Tu QR para {nombre}"),
        html: format!(
            r#"<div style="font-family:system-ui,Arial,sans-serif">
  <h2>Pago aprobado: tu acceso a {titulo}</h2>
  <p>Mostrá este código al inicio. Se canjea una sola vez.</p>
  <p><img src="{qr_data_url}" width="256" height="256" alt="QR"/></p>
  <p><a href="{url}">Verificar mi entrada</a></p>
  <p>También te adjuntamos el QR como {QR_FILENAME}.</p>
</div>"#
        ),
        attachments: vec![EmailAttachment {
            filename: QR_FILENAME.to_string(),
            content: qr,
            content_type: PNG_CONTENT_TYPE.to_string(),
        }],
    })
}
