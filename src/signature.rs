//! Enveloped XML-DSig signatures over assertions.
//!
//! The remote verifier accepts RSA-SHA1 with PKCS#1 v1.5 padding over the
//! exclusive-canonical form of the assertion, so that is the one algorithm
//! suite implemented here. Order matters: the reference digest covers the
//! canonical unsigned assertion bytes, and the signature covers the canonical
//! `SignedInfo` bytes that embed that digest.

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::{general_purpose::STANDARD as BASE64, Engine};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

use crate::assertion::{
    Assertion, ALG_ENVELOPED_SIGNATURE, ALG_EXC_C14N, ALG_RSA_SHA1, ALG_SHA1, NS_XMLDSIG,
};
use crate::canonical::Element;

/// An XML-DSig signature embedded in an assertion.
#[derive(Debug, Clone)]
pub struct Signature {
    /// The signed-info block the signature value covers.
    pub signed_info: SignedInfo,
    /// base64 of the RSA PKCS#1 v1.5 signature over the canonical
    /// `SignedInfo` bytes.
    pub signature_value: String,
}

/// The `SignedInfo` block: canonicalization and signature methods plus the
/// single reference binding the signature to the assertion content.
#[derive(Debug, Clone)]
pub struct SignedInfo {
    /// Canonicalization algorithm identifier (exclusive C14N).
    pub canonicalization_method: String,
    /// Signature algorithm identifier (RSA-SHA1).
    pub signature_method: String,
    /// Reference to the signed assertion.
    pub reference: Reference,
}

/// A reference to the signed element, carrying its digest.
#[derive(Debug, Clone)]
pub struct Reference {
    /// `#` + the assertion's reference id.
    pub uri: String,
    /// Ordered transform algorithm identifiers.
    pub transforms: Vec<String>,
    /// Digest algorithm identifier (SHA-1).
    pub digest_method: String,
    /// base64 of the SHA-1 digest of the canonical referenced bytes.
    pub digest_value: String,
}

impl Signature {
    pub(crate) fn to_element(&self) -> Element {
        Element::new("Signature")
            .attr("xmlns", NS_XMLDSIG)
            .child(self.signed_info.to_element())
            .child(Element::new("SignatureValue").text(&self.signature_value))
    }
}

impl SignedInfo {
    fn to_element(&self) -> Element {
        let mut transforms = Element::new("Transforms");
        for transform in &self.reference.transforms {
            transforms = transforms.child(Element::new("Transform").attr("Algorithm", transform));
        }

        // SignedInfo is canonicalized standalone as the signature input;
        // exclusive C14N renders the visibly utilized default namespace on
        // the apex of the canonicalized subset, so it is declared here
        Element::new("SignedInfo")
            .attr("xmlns", NS_XMLDSIG)
            .child(
                Element::new("CanonicalizationMethod")
                    .attr("Algorithm", &self.canonicalization_method),
            )
            .child(Element::new("SignatureMethod").attr("Algorithm", &self.signature_method))
            .child(
                Element::new("Reference")
                    .attr("URI", &self.reference.uri)
                    .child(transforms)
                    .child(
                        Element::new("DigestMethod")
                            .attr("Algorithm", &self.reference.digest_method),
                    )
                    .child(Element::new("DigestValue").text(&self.reference.digest_value)),
            )
    }
}

/// Signs the assertion in place, attaching an enveloped signature.
///
/// The digest covers the canonical bytes of the unsigned assertion; the
/// signature covers the canonical bytes of the `SignedInfo` built around that
/// digest. On any failure the assertion is left untouched; a partially signed
/// assertion is never surfaced.
///
/// # Arguments
///
/// * `assertion` - The unsigned assertion to sign.
/// * `key` - The RSA private key registered with the remote verifier.
pub fn sign_assertion(assertion: &mut Assertion, key: &RsaPrivateKey) -> Result<()> {
    if assertion.signature.is_some() {
        bail!("assertion {} is already signed", assertion.ref_id);
    }

    log::debug!("Signing assertion {}", assertion.ref_id);

    let canonical = assertion.canonical_xml_unsigned();
    let digest_value = BASE64.encode(Sha1::digest(&canonical));
    log::trace!("Assertion digest: {digest_value}");

    let signed_info = SignedInfo {
        canonicalization_method: ALG_EXC_C14N.to_owned(),
        signature_method: ALG_RSA_SHA1.to_owned(),
        reference: Reference {
            uri: format!("#{}", assertion.ref_id),
            transforms: vec![ALG_ENVELOPED_SIGNATURE.to_owned(), ALG_EXC_C14N.to_owned()],
            digest_method: ALG_SHA1.to_owned(),
            digest_value,
        },
    };

    let signature_value = signature_value(&signed_info, key)
        .with_context(|| format!("unable to sign assertion {}", assertion.ref_id))?;

    assertion.signature = Some(Signature {
        signed_info,
        signature_value,
    });

    Ok(())
}

/// Verifies an assertion's enveloped signature against the corresponding
/// public key: the reference digest must match the canonical unsigned
/// assertion, and the signature value must verify over the canonical
/// `SignedInfo` bytes.
pub fn verify_assertion(assertion: &Assertion, key: &RsaPublicKey) -> Result<()> {
    let signature = assertion
        .signature
        .as_ref()
        .ok_or_else(|| anyhow!("assertion {} is not signed", assertion.ref_id))?;

    let expected_uri = format!("#{}", assertion.ref_id);
    if signature.signed_info.reference.uri != expected_uri {
        bail!(
            "signature reference {} does not target assertion {}",
            signature.signed_info.reference.uri,
            assertion.ref_id
        );
    }

    let canonical = assertion.canonical_xml_unsigned();
    let digest_value = BASE64.encode(Sha1::digest(&canonical));
    if digest_value != signature.signed_info.reference.digest_value {
        bail!("digest mismatch: assertion content does not match its signature");
    }

    let signed_info_digest = Sha1::digest(signature.signed_info.to_element().to_canonical_bytes());
    let signature_bytes = BASE64
        .decode(&signature.signature_value)
        .context("signature value is not valid base64")?;

    key.verify(
        Pkcs1v15Sign::new::<Sha1>(),
        &signed_info_digest,
        &signature_bytes,
    )
    .map_err(|e| anyhow!("signature verification failed: {e}"))
}

fn signature_value(signed_info: &SignedInfo, key: &RsaPrivateKey) -> Result<String> {
    let canonical = signed_info.to_element().to_canonical_bytes();
    let digest = Sha1::digest(&canonical);

    let signature = key
        .sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
        .map_err(|e| anyhow!("RSA signing failed: {e}"))?;

    Ok(BASE64.encode(signature))
}
