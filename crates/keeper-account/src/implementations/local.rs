//! Mnemonic-backed local signer.
//!
//! Produces legacy amino-JSON `StdTx` payloads: the sign document is the
//! canonical (sorted keys, compact) JSON of chain id, account number,
//! sequence, fee, memo and messages; its SHA-256 digest is signed with
//! secp256k1 and attached together with the compressed public key.

use crate::{AccountError, AccountInterface};
use alloy_primitives::B256;
use alloy_signer::SignerSync;
use alloy_signer_local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use keeper_types::{Fee, SecretString, SignRequest, SignedTransaction};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Default BIP-44 path for coin type 529.
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/529'/0'/0/0";

const PUBKEY_TYPE: &str = "tendermint/PubKeySecp256k1";

/// Local account holding a key derived from a BIP-39 mnemonic.
pub struct LocalAccount {
	signer: PrivateKeySigner,
	/// Bech32 address of the key on the ledger.
	address: String,
}

impl LocalAccount {
	pub fn new(
		mnemonic: &SecretString,
		derivation_path: &str,
		address: impl Into<String>,
	) -> Result<Self, AccountError> {
		let signer = mnemonic.with_exposed(|phrase| {
			MnemonicBuilder::<English>::default()
				.phrase(phrase)
				.derivation_path(derivation_path)
				.map_err(|e| AccountError::InvalidKey(format!("Invalid derivation path: {}", e)))?
				.build()
				.map_err(|e| AccountError::InvalidKey(format!("Invalid mnemonic: {}", e)))
		})?;

		Ok(Self {
			signer,
			address: address.into(),
		})
	}

	/// Compressed SEC1 encoding of the public key (33 bytes).
	fn public_key(&self) -> Vec<u8> {
		self.signer
			.credential()
			.verifying_key()
			.to_sec1_bytes()
			.into_vec()
	}

	/// Signs `sign_doc` and returns the 64-byte `r || s` signature.
	fn sign_document(&self, sign_doc: &Value) -> Result<Vec<u8>, AccountError> {
		let bytes =
			serde_json::to_vec(sign_doc).map_err(|e| AccountError::SigningFailed(e.to_string()))?;
		let digest = B256::from_slice(Sha256::digest(&bytes).as_slice());

		let signature = self
			.signer
			.sign_hash_sync(&digest)
			.map_err(|e| AccountError::SigningFailed(e.to_string()))?;

		let mut out = Vec::with_capacity(64);
		out.extend_from_slice(&signature.r().to_be_bytes::<32>());
		out.extend_from_slice(&signature.s().to_be_bytes::<32>());
		Ok(out)
	}
}

fn fee_json(fee: &Fee) -> Value {
	json!({
		"amount": [{ "amount": fee.amount.to_string(), "denom": fee.denom }],
		"gas": fee.gas.to_string(),
	})
}

/// Builds the canonical sign document for `request`.
///
/// `serde_json` maps are ordered, so the serialized form has sorted keys.
pub(crate) fn sign_doc(request: &SignRequest) -> Value {
	json!({
		"account_number": request.account_number.to_string(),
		"chain_id": request.chain_id,
		"fee": fee_json(&request.fee),
		"memo": request.memo,
		"msgs": request.msgs,
		"sequence": request.sequence.to_string(),
	})
}

#[async_trait]
impl AccountInterface for LocalAccount {
	async fn address(&self) -> Result<String, AccountError> {
		Ok(self.address.clone())
	}

	async fn sign(&self, request: &SignRequest) -> Result<SignedTransaction, AccountError> {
		let signature = self.sign_document(&sign_doc(request))?;

		let tx = json!({
			"msg": request.msgs,
			"fee": fee_json(&request.fee),
			"signatures": [{
				"pub_key": {
					"type": PUBKEY_TYPE,
					"value": STANDARD.encode(self.public_key()),
				},
				"signature": STANDARD.encode(signature),
			}],
			"memo": request.memo,
		});

		let payload =
			serde_json::to_vec(&tx).map_err(|e| AccountError::SigningFailed(e.to_string()))?;
		Ok(SignedTransaction::new(payload, request.fee.clone()))
	}
}

/// Factory function to create a local account from configuration.
///
/// Configuration parameters:
/// - `mnemonic`: BIP-39 phrase (required)
/// - `address`: bech32 address of the derived key (required)
/// - `derivation_path`: BIP-44 path (default: "m/44'/529'/0'/0/0")
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	let mnemonic = config
		.get("mnemonic")
		.and_then(|v| v.as_str())
		.map(SecretString::from)
		.ok_or_else(|| AccountError::InvalidKey("mnemonic is required".to_string()))?;
	if mnemonic.is_empty() {
		return Err(AccountError::InvalidKey("mnemonic cannot be empty".to_string()));
	}

	let address = config
		.get("address")
		.and_then(|v| v.as_str())
		.filter(|s| !s.trim().is_empty())
		.ok_or_else(|| AccountError::Implementation("address is required".to_string()))?;

	let derivation_path = config
		.get("derivation_path")
		.and_then(|v| v.as_str())
		.unwrap_or(DEFAULT_DERIVATION_PATH);

	Ok(Box::new(LocalAccount::new(
		&mnemonic,
		derivation_path,
		address,
	)?))
}

/// Registry for the local account implementation.
pub struct Registry;

impl keeper_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = crate::AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl crate::AccountRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	const PHRASE: &str = "test test test test test test test test test test test junk";

	fn request() -> SignRequest {
		SignRequest {
			chain_id: "secret-4".to_string(),
			account_number: 42,
			sequence: 7,
			msgs: vec![json!({
				"type": "wasm/MsgExecuteContract",
				"value": { "sender": "secret1me", "contract": "secret1c", "msg": { "vest": {} }, "funds": [] }
			})],
			fee: Fee::new(25_000, "uscrt", 200_000),
			memo: String::new(),
		}
	}

	fn account() -> LocalAccount {
		LocalAccount::new(&SecretString::from(PHRASE), DEFAULT_DERIVATION_PATH, "secret1me")
			.unwrap()
	}

	#[test]
	fn test_derivation_path_is_honoured() {
		// Well-known first key of this phrase on the Ethereum path.
		let evm = LocalAccount::new(&SecretString::from(PHRASE), "m/44'/60'/0'/0/0", "x").unwrap();
		assert_eq!(
			hex::encode(evm.signer.address().as_slice()),
			"f39fd6e51aad88f6f4ce6ab8827279cfffb92266"
		);

		assert_ne!(account().signer.address(), evm.signer.address());
	}

	#[test]
	fn test_sign_doc_is_canonical() {
		let doc = serde_json::to_string(&sign_doc(&request())).unwrap();
		assert_eq!(
			doc,
			concat!(
				r#"{"account_number":"42","chain_id":"secret-4","#,
				r#""fee":{"amount":[{"amount":"25000","denom":"uscrt"}],"gas":"200000"},"#,
				r#""memo":"","#,
				r#""msgs":[{"type":"wasm/MsgExecuteContract","value":{"contract":"secret1c","funds":[],"msg":{"vest":{}},"sender":"secret1me"}}],"#,
				r#""sequence":"7"}"#
			)
		);
	}

	#[tokio::test]
	async fn test_signed_payload_shape() {
		let account = account();
		let signed = account.sign(&request()).await.unwrap();
		assert_eq!(signed.fee, Fee::new(25_000, "uscrt", 200_000));

		let tx: Value = serde_json::from_slice(&signed.payload).unwrap();
		assert_eq!(tx["fee"]["gas"], "200000");
		assert_eq!(tx["msg"][0]["value"]["msg"], json!({ "vest": {} }));

		let sig = &tx["signatures"][0];
		assert_eq!(sig["pub_key"]["type"], PUBKEY_TYPE);
		let pubkey = STANDARD
			.decode(sig["pub_key"]["value"].as_str().unwrap())
			.unwrap();
		assert_eq!(pubkey.len(), 33);
		assert!(pubkey[0] == 0x02 || pubkey[0] == 0x03);
		let signature = STANDARD
			.decode(sig["signature"].as_str().unwrap())
			.unwrap();
		assert_eq!(signature.len(), 64);

		// RFC 6979 signing is deterministic; a new sequence changes the signature.
		let again = account.sign(&request()).await.unwrap();
		assert_eq!(again.payload, signed.payload);
		let mut bumped = request();
		bumped.sequence += 1;
		let other = account.sign(&bumped).await.unwrap();
		assert_ne!(other.payload, signed.payload);
	}

	#[tokio::test]
	async fn test_factory() {
		let config: toml::Value = toml::from_str(&format!(
			"mnemonic = \"{}\"\naddress = \"secret1me\"",
			PHRASE
		))
		.unwrap();
		let account = create_account(&config).unwrap();
		assert_eq!(account.address().await.unwrap(), "secret1me");

		let missing: toml::Value = toml::from_str("address = \"secret1me\"").unwrap();
		assert!(matches!(
			create_account(&missing),
			Err(AccountError::InvalidKey(_))
		));

		let bad: toml::Value = toml::from_str(&format!(
			"mnemonic = \"{}\"\naddress = \"secret1me\"\nderivation_path = \"nope\"",
			PHRASE
		))
		.unwrap();
		assert!(create_account(&bad).is_err());
	}
}
