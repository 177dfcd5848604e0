use data_encoding::HEXLOWER;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Who may submit reports for a run.
#[derive(Clone, PartialEq, Eq)]
pub enum RunAuth {
    /// Every caller is accepted.
    Open,
    /// Callers must present this token.
    Token(String),
}

impl RunAuth {
    /// A fresh random token, hex-encoded.
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::Token(HEXLOWER.encode(&secret))
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            RunAuth::Open => None,
            RunAuth::Token(token) => Some(token),
        }
    }

    pub fn authorize(&self, presented: Option<&str>) -> bool {
        match (self, presented) {
            (RunAuth::Open, _) => true,
            (RunAuth::Token(_), None) => false,
            // digests first so the comparison doesn't leak the token length
            (RunAuth::Token(expected), Some(presented)) => {
                let expected = Sha256::digest(expected.as_bytes());
                let presented = Sha256::digest(presented.as_bytes());
                expected.as_slice().ct_eq(presented.as_slice()).into()
            }
        }
    }
}

impl std::fmt::Debug for RunAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunAuth::Open => f.write_str("Open"),
            RunAuth::Token(_) => f.write_str("Token(<redacted>)"),
        }
    }
}
