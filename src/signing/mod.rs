//! Signing and authentication for Polymarket requests.
//!
//! A [`RequestSigner`] is built once from the configured private key and
//! shared by the live client for auth headers and order signatures.

use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use tracing::debug;

use crate::error::TradingError;

/// Wallet flavour behind the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum WalletKind {
    /// Externally owned account.
    Eoa,
    /// Magic.link proxy wallet.
    Proxy,
    /// Gnosis Safe.
    GnosisSafe,
}

impl WalletKind {
    /// Map the configured signature type; unknown values fall back to EOA.
    pub fn from_signature_type(sig_type: u8) -> Self {
        match sig_type {
            1 => WalletKind::Proxy,
            2 => WalletKind::GnosisSafe,
            _ => WalletKind::Eoa,
        }
    }

    /// Numeric signature type sent with orders.
    pub fn signature_type(&self) -> u8 {
        match self {
            WalletKind::Eoa => 0,
            WalletKind::Proxy => 1,
            WalletKind::GnosisSafe => 2,
        }
    }
}

/// Create a LocalSigner from a hex-encoded private key.
///
/// The private key can be with or without the "0x" prefix.
pub fn create_signer(private_key: &str) -> Result<PrivateKeySigner, TradingError> {
    let key = private_key.strip_prefix("0x").unwrap_or(private_key);
    let bytes = hex::decode(key)
        .map_err(|e| TradingError::SigningError(format!("Invalid private key hex: {}", e)))?;

    let key_bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        TradingError::SigningError(format!("Private key must be 32 bytes, got {}", bytes.len()))
    })?;

    PrivateKeySigner::from_bytes(&key_bytes.into())
        .map_err(|e| TradingError::SigningError(format!("Failed to create signer: {}", e)))
}

/// Get the wallet address from a private key.
pub fn address_from_private_key(private_key: &str) -> Result<String, TradingError> {
    Ok(format!("{:?}", create_signer(private_key)?.address()))
}

/// Signs auth headers and order payloads with one wallet.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    signer: PrivateKeySigner,
    kind: WalletKind,
    funder: Option<String>,
}

impl RequestSigner {
    /// Build from a private key and wallet settings.
    pub fn new(
        private_key: &str,
        signature_type: u8,
        funder: Option<String>,
    ) -> Result<Self, TradingError> {
        Ok(Self {
            signer: create_signer(private_key)?,
            kind: WalletKind::from_signature_type(signature_type),
            funder,
        })
    }

    /// Signing address (checksummed hex).
    pub fn address(&self) -> String {
        format!("{:?}", self.signer.address())
    }

    /// Address that holds the funds: the funder for proxy wallets, else the signer.
    pub fn maker_address(&self) -> String {
        match (&self.kind, &self.funder) {
            (WalletKind::Proxy | WalletKind::GnosisSafe, Some(funder)) => funder.clone(),
            _ => self.address(),
        }
    }

    /// Wallet flavour.
    pub fn kind(&self) -> WalletKind {
        self.kind
    }

    /// Sign a message, returning a 0x-prefixed hex signature.
    pub async fn sign_hex(&self, message: &[u8]) -> Result<String, TradingError> {
        let signature = self
            .signer
            .sign_message(message)
            .await
            .map_err(|e| TradingError::SigningError(format!("Failed to sign message: {}", e)))?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }

    /// Generate CLOB authentication headers for one request.
    pub async fn auth_headers(&self) -> Result<Vec<(String, String)>, TradingError> {
        let address = self.address();
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let signature = self
            .sign_hex(format!("polymarket:{}", timestamp).as_bytes())
            .await?;

        debug!(address = %address, "Generated auth headers");

        Ok(vec![
            ("POLY_ADDRESS".to_string(), address),
            ("POLY_SIGNATURE".to_string(), signature),
            ("POLY_TIMESTAMP".to_string(), timestamp),
            ("POLY_NONCE".to_string(), "0".to_string()),
        ])
    }
}
