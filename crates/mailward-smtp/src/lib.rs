//! SMTP delivery with a single reused connection.
//!
//! One connection, one consumer, sequential use. Before each send the
//! existing connection is probed and rebuilt if it has gone away.

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeliverError {
    #[error("invalid e-mail address '{address}': {reason}")]
    Address { address: String, reason: String },
    #[error("could not build message: {0}")]
    Build(String),
    #[error("SMTP connection to {server}:{port} failed: {reason}")]
    Connect {
        server: String,
        port: u16,
        reason: String,
    },
    #[error("SMTP delivery failed: {0}")]
    Send(String),
}

/// A fully rendered message, ready for delivery.
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub from_address: String,
    pub from_name: String,
    /// Recipient field as stored in the spool record; may hold several
    /// comma-separated addresses.
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
}

/// Delivery seam: the spool-file processor only needs this, so tests can
/// substitute a recording implementation.
pub trait Deliver {
    fn deliver(&mut self, mail: &OutgoingMail) -> Result<(), DeliverError>;
}

/// SMTP connection settings from the send-mail config section.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub use_tls: bool,
    pub use_ssl: bool,
    pub username: String,
    pub password: String,
}

/// Lazily (re)connected SMTP mailer.
pub struct SmtpMailer {
    settings: SmtpSettings,
    transport: Option<SmtpTransport>,
}

impl SmtpMailer {
    pub fn new(settings: SmtpSettings) -> Self {
        SmtpMailer {
            settings,
            transport: None,
        }
    }

    fn connect(&self) -> Result<SmtpTransport, DeliverError> {
        let s = &self.settings;
        let connect_err = |reason: String| DeliverError::Connect {
            server: s.server.clone(),
            port: s.port,
            reason,
        };

        let mut builder = SmtpTransport::builder_dangerous(&s.server).port(s.port);
        if s.use_ssl {
            // implicit TLS, usually port 465
            let tls = TlsParameters::new(s.server.clone()).map_err(|e| connect_err(e.to_string()))?;
            builder = builder.tls(Tls::Wrapper(tls));
        } else if s.use_tls {
            let tls = TlsParameters::new(s.server.clone()).map_err(|e| connect_err(e.to_string()))?;
            builder = builder.tls(Tls::Required(tls));
        }
        if !s.username.is_empty() && !s.password.is_empty() {
            builder = builder.credentials(Credentials::new(s.username.clone(), s.password.clone()));
        }
        Ok(builder.build())
    }

    /// Probe the held connection and rebuild it when dead or absent.
    fn ensure_transport(&mut self) -> Result<&SmtpTransport, DeliverError> {
        if let Some(transport) = &self.transport {
            match transport.test_connection() {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    tracing::warn!("SMTP connection lost; reconnecting");
                    self.transport = None;
                }
            }
        }
        if self.transport.is_none() {
            let transport = self.connect()?;
            // surface connection/auth problems now rather than on first send
            transport.test_connection().map_err(|e| DeliverError::Connect {
                server: self.settings.server.clone(),
                port: self.settings.port,
                reason: e.to_string(),
            })?;
            self.transport = Some(transport);
        }
        Ok(self.transport.as_ref().expect("transport just set"))
    }
}

fn parse_mailbox(name: Option<&str>, address: &str) -> Result<Mailbox, DeliverError> {
    let spec = match name {
        Some(name) if !name.is_empty() => format!("{} <{}>", name, address.trim()),
        _ => address.trim().to_string(),
    };
    spec.parse().map_err(|e: lettre::address::AddressError| {
        DeliverError::Address {
            address: address.to_string(),
            reason: e.to_string(),
        }
    })
}

impl Deliver for SmtpMailer {
    fn deliver(&mut self, mail: &OutgoingMail) -> Result<(), DeliverError> {
        let from = parse_mailbox(Some(&mail.from_name), &mail.from_address)?;

        let mut builder = Message::builder()
            .from(from)
            .subject(&mail.subject);
        for address in mail.to.split(',') {
            builder = builder.to(parse_mailbox(None, address)?);
        }

        let message = builder
            .multipart(MultiPart::alternative_plain_html(
                mail.body_text.clone(),
                mail.body_html.clone(),
            ))
            .map_err(|e| DeliverError::Build(e.to_string()))?;

        tracing::info!(
            "sending e-mail to {} via SMTP server {}:{}",
            mail.to,
            self.settings.server,
            self.settings.port
        );
        let transport = self.ensure_transport()?;
        transport
            .send(&message)
            .map(|_| ())
            .map_err(|e| DeliverError::Send(e.to_string()))
    }
}
