//! One-time import of secrets that predate the rotation engine.
//!
//! Legacy deployments passed key material through environment variables
//! holding comma-separated tokens. A token is either a `secret://<ref>`
//! pointer (optionally suffixed with `?target=file`) resolved through the
//! secret manager, or a literal value. Every resolved value is itself a
//! comma-separated list of base64 blocks, most recent first.

use crate::rotation::store::SecretManager;
use anyhow::{bail, Context, Result};
use base64ct::{Base64, Encoding};

pub const SECRET_SCHEME: &str = "secret://";

/// Transforms decoded blocks before they become generations.
pub type Mutator = fn(Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Reference(String),
    Literal(String),
}

/// Split an environment value into tokens.
///
/// # Errors
/// Returns an error for an empty `secret://` reference or an unsupported query.
pub fn parse_tokens(value: &str) -> Result<Vec<Token>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            let Some(reference) = token.strip_prefix(SECRET_SCHEME) else {
                return Ok(Token::Literal(token.to_string()));
            };

            let (reference, query) = match reference.split_once('?') {
                Some((reference, query)) => (reference, Some(query)),
                None => (reference, None),
            };

            if let Some(query) = query {
                if query != "target=file" {
                    bail!("unsupported secret reference option: {query}");
                }
            }

            if reference.is_empty() {
                bail!("empty secret reference in {token}");
            }

            Ok(Token::Reference(reference.to_string()))
        })
        .collect()
}

/// Resolve an environment value into decoded key blocks, in order.
///
/// # Errors
/// Returns an error if a reference cannot be resolved or a block is not valid base64.
pub async fn resolve_blocks<M: SecretManager + ?Sized>(
    manager: &M,
    value: &str,
) -> Result<Vec<Vec<u8>>> {
    let mut blocks = Vec::new();

    for token in parse_tokens(value)? {
        let resolved = match token {
            Token::Literal(literal) => literal,
            Token::Reference(reference) => {
                let bytes = manager
                    .get_value(&reference)
                    .await
                    .with_context(|| format!("failed to resolve secret://{reference}"))?;
                String::from_utf8(bytes)
                    .with_context(|| format!("secret://{reference} is not valid UTF-8"))?
            }
        };

        for block in resolved.split(',').map(str::trim).filter(|b| !b.is_empty()) {
            let decoded = Base64::decode_vec(block)
                .map_err(|e| anyhow::anyhow!("{e}"))
                .with_context(|| format!("failed to decode secret block {}", blocks.len()))?;
            blocks.push(decoded);
        }
    }

    Ok(blocks)
}

/// Merge legacy (hmac, encryption) cookie key pairs into single blocks.
///
/// # Errors
/// Returns an error when the block count is odd.
pub fn cookie_pairs(blocks: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
    if blocks.len() % 2 != 0 {
        bail!(
            "invalid number of cookie secret bytes: got {} blocks, expected pairs",
            blocks.len()
        );
    }

    Ok(blocks.chunks(2).map(|pair| pair.concat()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::memory::MemorySecretManager;

    #[test]
    fn parse_tokens_mixed() {
        let tokens = parse_tokens("secret://refA, secret://refB?target=file,QUJD").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Reference("refA".to_string()),
                Token::Reference("refB".to_string()),
                Token::Literal("QUJD".to_string()),
            ]
        );
    }

    #[test]
    fn parse_tokens_rejects_bad_references() {
        assert!(parse_tokens("secret://").is_err());
        assert!(parse_tokens("secret://ref?target=env").is_err());
        assert!(parse_tokens(" , ").unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolve_reference_with_two_blocks() {
        let manager = MemorySecretManager::new();
        manager.put("refA", b"YWJj,ZGVm").unwrap();

        let blocks = resolve_blocks(&manager, "secret://refA").await.unwrap();
        assert_eq!(blocks, vec![b"abc".to_vec(), b"def".to_vec()]);
    }

    #[tokio::test]
    async fn resolve_fails_on_missing_reference() {
        let manager = MemorySecretManager::new();
        let err = resolve_blocks(&manager, "secret://missing").await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to resolve secret://missing"));
    }

    #[tokio::test]
    async fn resolve_fails_on_malformed_base64() {
        let manager = MemorySecretManager::new();
        let err = resolve_blocks(&manager, "YWJj,not base64!").await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to decode secret block 1"));
    }

    #[test]
    fn cookie_pairs_concatenates() {
        let merged = cookie_pairs(vec![
            b"h1".to_vec(),
            b"e1".to_vec(),
            b"h2".to_vec(),
            b"e2".to_vec(),
        ])
        .unwrap();
        assert_eq!(merged, vec![b"h1e1".to_vec(), b"h2e2".to_vec()]);
    }

    #[test]
    fn cookie_pairs_rejects_odd_count() {
        let err = cookie_pairs(vec![b"h1".to_vec()]).unwrap_err();
        assert!(err
            .to_string()
            .contains("invalid number of cookie secret bytes"));
    }
}
