//! SAML 2.0 bearer assertion construction.
//!
//! An [`Assertion`] is the time-bounded statement vouching for a customer's
//! identity. It is built unsigned, signed by [`crate::signature`], and then
//! exchanged for an access credential by [`crate::exchange`].

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use uuid::Uuid;

use crate::canonical::Element;
use crate::signature::Signature;

/// SAML 2.0 assertion namespace.
pub const NS_ASSERTION: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
/// XML digital signature namespace.
pub const NS_XMLDSIG: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Exclusive canonicalization algorithm identifier.
pub const ALG_EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
/// RSA-SHA1 signature algorithm identifier.
pub const ALG_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
/// SHA-1 digest algorithm identifier.
pub const ALG_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
/// Enveloped-signature transform identifier.
pub const ALG_ENVELOPED_SIGNATURE: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

const AUTHN_CONTEXT_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:2.0:ac:classes:unspecified";
const NAME_ID_FORMAT_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";
const CONFIRMATION_METHOD_BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";

const SAML_VERSION: &str = "2.0";

/// A SAML 2.0 assertion vouching for a customer's identity.
///
/// The signature is `None` until [`crate::signature::sign_assertion`] attaches
/// one; it is never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Assertion {
    /// Unique, unguessable reference identifier. Starts with `_` so it is
    /// always a valid XML ID token, followed by 32 lowercase hex characters.
    pub ref_id: String,
    /// When the assertion was issued.
    pub issue_instant: DateTime<Utc>,
    /// Identity provider id issuing the assertion.
    pub issuer: String,
    /// The customer this assertion vouches for.
    pub subject: Subject,
    /// Validity window and audience restriction.
    pub conditions: Conditions,
    /// Authentication statement; its session index equals `ref_id`.
    pub authn_statement: AuthnStatement,
    /// Enveloped XML-DSig signature, present once signed.
    pub signature: Option<Signature>,
}

/// Assertion subject: the principal identifier and its confirmation method.
#[derive(Debug, Clone)]
pub struct Subject {
    /// Name identifier of the customer.
    pub name_id: NameId,
    /// Subject confirmation method URN (bearer).
    pub confirmation_method: String,
}

/// A name identifier with its format URN.
#[derive(Debug, Clone)]
pub struct NameId {
    /// Name identifier format URN.
    pub format: String,
    /// The customer identifier.
    pub value: String,
}

/// Validity window `[NotBefore, NotOnOrAfter)` and audience restriction.
#[derive(Debug, Clone)]
pub struct Conditions {
    /// Start of the validity window, inclusive.
    pub not_before: DateTime<Utc>,
    /// End of the validity window, exclusive.
    pub not_on_or_after: DateTime<Utc>,
    /// Audience the assertion is restricted to.
    pub audience: String,
}

/// Authentication statement carried by the assertion.
#[derive(Debug, Clone)]
pub struct AuthnStatement {
    /// When the authentication took place.
    pub authn_instant: DateTime<Utc>,
    /// Session index, equal to the assertion's `ref_id`.
    pub session_index: String,
    /// Authentication context class URN.
    pub context_class_ref: String,
}

impl Assertion {
    /// Builds an unsigned assertion for `customer_id`, valid from now until
    /// now + `lifetime`.
    ///
    /// # Arguments
    ///
    /// * `issuer` - SAML provider id issuing the assertion.
    /// * `customer_id` - The customer identifier; must be non-empty.
    /// * `lifetime` - Validity window length; must be positive and should be
    ///   short (minutes), long enough to cover the exchange round trip.
    pub fn new(issuer: &str, customer_id: &str, lifetime: Duration) -> Result<Self> {
        if customer_id.is_empty() {
            bail!("customer id must not be empty");
        }
        if lifetime <= Duration::zero() {
            bail!("assertion lifetime must be positive, got {lifetime}");
        }

        let now = Utc::now();
        let ref_id = new_ref_id();
        log::debug!("Building assertion {ref_id} for customer '{customer_id}'");

        Ok(Assertion {
            ref_id: ref_id.clone(),
            issue_instant: now,
            issuer: issuer.to_owned(),
            subject: Subject {
                name_id: NameId {
                    format: NAME_ID_FORMAT_UNSPECIFIED.to_owned(),
                    value: customer_id.to_owned(),
                },
                confirmation_method: CONFIRMATION_METHOD_BEARER.to_owned(),
            },
            conditions: Conditions {
                not_before: now,
                not_on_or_after: now + lifetime,
                audience: issuer.to_owned(),
            },
            authn_statement: AuthnStatement {
                authn_instant: now,
                session_index: ref_id,
                context_class_ref: AUTHN_CONTEXT_UNSPECIFIED.to_owned(),
            },
            signature: None,
        })
    }

    /// Serializes the assertion (including its signature, if attached) to
    /// canonical XML bytes.
    pub fn canonical_xml(&self) -> Vec<u8> {
        self.to_element(true).to_canonical_bytes()
    }

    /// Canonical XML bytes of the assertion without its signature. This is
    /// the exact byte sequence the signature's reference digest covers: the
    /// enveloped-signature transform excludes the `Signature` subtree from
    /// the digested content.
    pub(crate) fn canonical_xml_unsigned(&self) -> Vec<u8> {
        self.to_element(false).to_canonical_bytes()
    }

    fn to_element(&self, include_signature: bool) -> Element {
        let mut assertion = Element::new("Assertion")
            .attr("xmlns", NS_ASSERTION)
            .attr("ID", &self.ref_id)
            .attr("IssueInstant", format_instant(self.issue_instant))
            .attr("Version", SAML_VERSION)
            .child(Element::new("Issuer").text(&self.issuer));

        if include_signature {
            if let Some(signature) = &self.signature {
                assertion = assertion.child(signature.to_element());
            }
        }

        assertion
            .child(
                Element::new("Subject")
                    .child(
                        Element::new("NameID")
                            .attr("Format", &self.subject.name_id.format)
                            .text(&self.subject.name_id.value),
                    )
                    .child(
                        Element::new("SubjectConfirmation")
                            .attr("Method", &self.subject.confirmation_method),
                    ),
            )
            .child(
                Element::new("Conditions")
                    .attr("NotBefore", format_instant(self.conditions.not_before))
                    .attr(
                        "NotOnOrAfter",
                        format_instant(self.conditions.not_on_or_after),
                    )
                    .child(
                        Element::new("AudienceRestriction")
                            .child(Element::new("Audience").text(&self.conditions.audience)),
                    ),
            )
            .child(
                Element::new("AuthnStatement")
                    .attr(
                        "AuthnInstant",
                        format_instant(self.authn_statement.authn_instant),
                    )
                    .attr("SessionIndex", &self.authn_statement.session_index)
                    .child(Element::new("AuthnContext").child(
                        Element::new("AuthnContextClassRef")
                            .text(&self.authn_statement.context_class_ref),
                    )),
            )
    }
}

/// Generates a fresh assertion reference id: `_` followed by the 32 hex
/// characters of a random v4 UUID. The leading underscore keeps the id a
/// valid XML ID token (those may not begin with a digit).
fn new_ref_id() -> String {
    format!("_{}", Uuid::new_v4().simple())
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}
