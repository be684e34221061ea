use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest raw backend message shown to a user for unclassified errors.
pub const MAX_DISPLAY_MESSAGE_LEN: usize = 120;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CreateErrorKind {
    InsufficientBalance,
    Unavailable,
    AlreadyRented,
    Timeout,
    Network,
    Auth,
    Quota,
    Disk,
    Init,
    ServerUnavailable,
    BadRequest,
    Unknown,
}

impl CreateErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreateErrorKind::InsufficientBalance => "insufficient_balance",
            CreateErrorKind::Unavailable => "unavailable",
            CreateErrorKind::AlreadyRented => "already_rented",
            CreateErrorKind::Timeout => "timeout",
            CreateErrorKind::Network => "network",
            CreateErrorKind::Auth => "auth",
            CreateErrorKind::Quota => "quota",
            CreateErrorKind::Disk => "disk",
            CreateErrorKind::Init => "init",
            CreateErrorKind::ServerUnavailable => "server_unavailable",
            CreateErrorKind::BadRequest => "bad_request",
            CreateErrorKind::Unknown => "unknown",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            CreateErrorKind::InsufficientBalance => "Saldo insuficiente",
            CreateErrorKind::Unavailable => "Oferta indisponível",
            CreateErrorKind::AlreadyRented => "Máquina já alugada",
            CreateErrorKind::Timeout => "Tempo esgotado ao criar a máquina",
            CreateErrorKind::Network => "Erro de rede",
            CreateErrorKind::Auth => "Falha de autenticação",
            CreateErrorKind::Quota => "Limite de máquinas atingido",
            CreateErrorKind::Disk => "Espaço em disco insuficiente",
            CreateErrorKind::Init => "Falha na inicialização da máquina",
            CreateErrorKind::ServerUnavailable => "Servidor indisponível",
            CreateErrorKind::BadRequest => "Requisição inválida",
            CreateErrorKind::Unknown => "Erro desconhecido",
        }
    }
}

impl fmt::Display for CreateErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("create_instance failed ({kind}): {message}")]
pub struct CreateError {
    pub kind: CreateErrorKind,
    /// Raw provider text, untruncated (for logs).
    pub message: String,
}

impl CreateError {
    pub fn new(kind: CreateErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Short text for a candidate's `error_message`.
    pub fn display_message(&self) -> String {
        match self.kind {
            CreateErrorKind::Unknown => {
                let raw = truncate_for_display(self.message.trim(), MAX_DISPLAY_MESSAGE_LEN);
                if raw.is_empty() {
                    self.kind.user_message().to_string()
                } else {
                    format!("Erro: {}", raw)
                }
            }
            kind => kind.user_message().to_string(),
        }
    }
}

// Order matters: the first rule with a matching needle wins.
// HTTP codes are matched as `status=<code>`, which is how providers format them.
const RULES: &[(CreateErrorKind, &[&str])] = &[
    (
        CreateErrorKind::InsufficientBalance,
        &[
            "insufficient balance",
            "insufficient funds",
            "insufficient credit",
            "not enough credit",
            "balance",
            "saldo",
            "status=402",
        ],
    ),
    (
        CreateErrorKind::AlreadyRented,
        &["already rented", "already been rented", "rented by another", "already in use"],
    ),
    (CreateErrorKind::Timeout, &["timeout", "timed out"]),
    (
        CreateErrorKind::ServerUnavailable,
        &[
            "service unavailable",
            "server unavailable",
            "bad gateway",
            "status=500",
            "status=502",
            "status=503",
            "status=504",
        ],
    ),
    (
        CreateErrorKind::Unavailable,
        &["unavailable", "not available", "no longer available", "no_such_ask", "offer not found"],
    ),
    (
        CreateErrorKind::Auth,
        &[
            "unauthorized",
            "forbidden",
            "status=401",
            "status=403",
            "api key",
            "authentication",
            "not authenticated",
        ],
    ),
    (
        CreateErrorKind::Quota,
        &["quota", "limit exceeded", "rate limit", "too many", "status=429"],
    ),
    (CreateErrorKind::Disk, &["disk", "insufficient space", "storage"]),
    (
        CreateErrorKind::Init,
        &["initialization", "failed to initialize", "onstart", "init script"],
    ),
    (
        CreateErrorKind::Network,
        &[
            "network",
            "connection",
            "error sending request",
            "dns",
            "econnrefused",
            "failed to fetch",
        ],
    ),
    (
        CreateErrorKind::BadRequest,
        &["bad request", "status=400", "status=422", "invalid"],
    ),
];

/// Heuristic classification of a raw create failure. Case-insensitive substring match;
/// anything unrecognised is `Unknown`.
pub fn classify_create_error(raw: &str) -> CreateError {
    let lower = raw.to_lowercase();
    let kind = RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(kind, _)| *kind)
        .unwrap_or(CreateErrorKind::Unknown);
    CreateError::new(kind, raw.trim())
}

/// Truncates on a char boundary, appending "..." when something was cut.
pub fn truncate_for_display(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let mut out: String = message.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_messages() {
        for (raw, kind) in [
            ("Insufficient balance to rent this machine", CreateErrorKind::InsufficientBalance),
            ("status=400 message=Your credit balance is too low", CreateErrorKind::InsufficientBalance),
            ("Instance was already rented by someone else", CreateErrorKind::AlreadyRented),
            ("create_instance timed out after 20s", CreateErrorKind::Timeout),
            ("status=503 message=Service Unavailable", CreateErrorKind::ServerUnavailable),
            ("status=404 message=Offer no longer available", CreateErrorKind::Unavailable),
            ("status=401 message=missing token", CreateErrorKind::Auth),
            ("Invalid API key", CreateErrorKind::Auth),
            ("status=429 message=slow down", CreateErrorKind::Quota),
            ("requested disk exceeds offer", CreateErrorKind::Disk),
            ("onstart failed", CreateErrorKind::Init),
            ("error sending request for url (http://x/instances)", CreateErrorKind::Network),
            ("status=400 message=Bad Request", CreateErrorKind::BadRequest),
            ("field label is invalid", CreateErrorKind::BadRequest),
        ] {
            assert_eq!(classify_create_error(raw).kind, kind, "{}", raw);
        }
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(
            classify_create_error("QUOTA EXCEEDED").kind,
            CreateErrorKind::Quota
        );
    }

    #[test]
    fn unknown_message_is_truncated_for_display() {
        let raw = "x".repeat(500);
        let err = classify_create_error(&raw);
        assert_eq!(err.kind, CreateErrorKind::Unknown);
        assert_eq!(err.message.len(), 500);
        let shown = err.display_message();
        assert!(shown.starts_with("Erro: "));
        assert_eq!(shown.len(), "Erro: ".len() + MAX_DISPLAY_MESSAGE_LEN + 3);
    }

    #[test]
    fn known_kinds_use_fixed_text() {
        let err = classify_create_error("Insufficient balance");
        assert_eq!(err.display_message(), "Saldo insuficiente");
        assert_eq!(err.kind.to_string(), "insufficient_balance");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_for_display("ação", 2), "aç...");
        assert_eq!(truncate_for_display("abc", 3), "abc");
    }
}
