//! Github as a proof target.
//!
//! Renders the gist document a user publishes to prove ownership of a Github
//! handle, and offers lookup/verify helpers over the Github API for hosts
//! that want to check publication. The proof service itself never calls
//! these: external verification is out of band.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::claim::SignedClaim;
use crate::error::{Error, Result};
use crate::http::Request;
use crate::types::Uid;

/// File name the proof gist must carry.
pub const GIST_NAME: &str = "idkit-proof.md";

const SIGNATURE_PREFIX: &str = "signature: ";
const UID_PREFIX: &str = "uid: ";

/// Renders the gist-ready proof document for a signed ownership claim.
///
/// # Errors
/// Fails only if the claim body cannot be rendered as JSON.
pub fn proof_document(signed: &SignedClaim, username: &str) -> Result<String> {
    let object = serde_json::to_string_pretty(&signed.claim)
        .map_err(|e| Error::Unknown(e.to_string()))?;
    let signature = BASE64_STANDARD.encode(&signed.signature);
    Ok(format!(
        "### idkit identity proof\n\n\
         I hereby claim:\n\n\
         * I am `{username}` on github\n\
         * I am identity `{uid}` on the ledger, signing with `{public}`\n\n\
         My claim:\n\n\
         ```json\n{object}\n```\n\n\
         {UID_PREFIX}{uid}\n\
         {SIGNATURE_PREFIX}{signature}\n",
        uid = signed.claim.uid,
        public = signed.claim.public,
    ))
}

/// Instructions shown to the user after a proof is produced.
#[must_use]
pub fn instructions() -> String {
    format!("Publish the following document as a public gist named `{GIST_NAME}`.")
}

#[derive(Deserialize)]
struct Gist {
    html_url: String,
    files: BTreeMap<String, GistFile>,
}

#[derive(Deserialize)]
struct GistFile {
    raw_url: String,
}

/// A published proof document found on Github.
pub struct PublishedProof {
    /// Where the gist lives.
    pub html_url: String,
    /// The raw document content.
    pub content: String,
}

impl PublishedProof {
    fn line_value(&self, prefix: &str) -> Option<&str> {
        self.content
            .lines()
            .find_map(|line| line.strip_prefix(prefix))
    }
}

/// Read-only Github API client for proof lookup.
pub struct GithubClient {
    http: Request,
    api_base: String,
}

impl Default for GithubClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GithubClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base("https://api.github.com".into())
    }

    #[must_use]
    pub fn with_base(api_base: String) -> Self {
        Self {
            http: Request::new(),
            api_base,
        }
    }

    /// All proof gists published by `username`.
    ///
    /// # Errors
    /// Surfaces transport failures after the collaborator-side retries are
    /// exhausted.
    pub async fn find_proofs(&self, username: &str) -> Result<Vec<PublishedProof>> {
        let url = format!("{}/users/{username}/gists", self.api_base);
        let response = self.http.handle(self.http.get(&url)).await?;
        let gists: Vec<Gist> = response
            .json()
            .await
            .map_err(|e| Error::Unknown(format!("bad gist listing: {e}")))?;

        let mut proofs = Vec::new();
        for mut gist in gists {
            let Some(file) = gist.files.remove(GIST_NAME) else {
                continue;
            };
            let response = self.http.handle(self.http.get(&file.raw_url)).await?;
            let content = response
                .text()
                .await
                .map_err(|e| Error::Unknown(format!("bad gist content: {e}")))?;
            proofs.push(PublishedProof {
                html_url: gist.html_url,
                content,
            });
        }
        Ok(proofs)
    }

    /// Finds the gist URL carrying exactly this claim signature, if any.
    ///
    /// # Errors
    /// Surfaces transport failures; an absent proof is `Ok(None)`.
    pub async fn verify(&self, username: &str, signed: &SignedClaim) -> Result<Option<String>> {
        let expected = BASE64_STANDARD.encode(&signed.signature);
        Ok(self
            .find_proofs(username)
            .await?
            .into_iter()
            .find(|proof| proof.line_value(SIGNATURE_PREFIX) == Some(expected.as_str()))
            .map(|proof| proof.html_url))
    }

    /// Uids claimed by `username` in its published proofs.
    ///
    /// # Errors
    /// Surfaces transport failures.
    pub async fn claimed_uids(&self, username: &str) -> Result<Vec<Uid>> {
        Ok(self
            .find_proofs(username)
            .await?
            .iter()
            .filter_map(|proof| proof.line_value(UID_PREFIX))
            .filter_map(|value| value.trim().parse().ok())
            .collect())
    }
}
