//! Interpretation of CloudStack XML response bodies.
//!
//! A response is an error response when it contains an `errortext` element
//! anywhere in the document; the HTTP status is never consulted.

use roxmltree::{Document, Node};

use super::CloudStackError;

/// Text reported for an empty response body.
pub const NULL_RESPONSE: &str = "null response from server";

const ERROR_TEXT: &str = "errortext";

/// A response body sorted into success or remote failure.
#[derive(Debug)]
pub enum Outcome<'input> {
    /// Well-formed document without an error envelope.
    Success(Response<'input>),
    /// Error text from the first `errortext` element, or [`NULL_RESPONSE`].
    Failure(String),
}

/// Parses `body` and classifies it.
///
/// # Errors
///
/// Returns [`CloudStackError::Parse`] when a non-blank body is not XML.
pub fn interpret(body: &str) -> Result<Outcome<'_>, CloudStackError> {
    if body.trim().is_empty() {
        return Ok(Outcome::Failure(NULL_RESPONSE.to_owned()));
    }
    let response = Response::parse(body)?;
    Ok(match response.first_text(ERROR_TEXT) {
        Some(text) => Outcome::Failure(text),
        None => Outcome::Success(response),
    })
}

/// Returns `true` when `body` is blank or carries an `errortext` element.
///
/// # Errors
///
/// Returns [`CloudStackError::Parse`] when a non-blank body is not XML.
pub fn contains_error(body: &str) -> Result<bool, CloudStackError> {
    Ok(matches!(interpret(body)?, Outcome::Failure(_)))
}

/// Extracts the trimmed text of the first `errortext` element.
///
/// # Errors
///
/// Returns [`CloudStackError::Parse`] for malformed XML and
/// [`CloudStackError::MissingElement`] when no error text is present.
pub fn error_text(body: &str) -> Result<String, CloudStackError> {
    match interpret(body)? {
        Outcome::Failure(text) => Ok(text),
        Outcome::Success(response) => response.require_text(ERROR_TEXT),
    }
}

/// Parsed response document.
#[derive(Debug)]
pub struct Response<'input> {
    body: &'input str,
    document: Document<'input>,
}

impl<'input> Response<'input> {
    /// Parses `body` as XML.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStackError::Parse`] carrying the offending body.
    pub fn parse(body: &'input str) -> Result<Self, CloudStackError> {
        let document = Document::parse(body).map_err(|err| CloudStackError::Parse {
            message: err.to_string(),
            body: body.to_owned(),
        })?;
        Ok(Self { body, document })
    }

    fn elements<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = Node<'a, 'input>> {
        self.document
            .descendants()
            .filter(move |node| node.has_tag_name(tag))
    }

    /// Whether at least one element named `tag` is present.
    #[must_use]
    pub fn has_element(&self, tag: &str) -> bool {
        self.elements(tag).next().is_some()
    }

    /// Trimmed text of the first element named `tag`.
    #[must_use]
    pub fn first_text(&self, tag: &str) -> Option<String> {
        self.elements(tag).next().map(text_content)
    }

    /// Like [`Response::first_text`] but fails when the element is absent.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStackError::MissingElement`].
    pub fn require_text(&self, tag: &str) -> Result<String, CloudStackError> {
        self.first_text(tag)
            .ok_or_else(|| CloudStackError::MissingElement {
                element: tag.to_owned(),
                body: self.body.to_owned(),
            })
    }

    /// Trimmed texts of every element named `tag`, in document order.
    #[must_use]
    pub fn all_texts(&self, tag: &str) -> Vec<String> {
        self.elements(tag).map(text_content).collect()
    }

    /// Ids of every listed `virtualmachine`, taken from the first nested `id`.
    #[must_use]
    pub fn virtual_machine_ids(&self) -> Vec<String> {
        self.elements("virtualmachine")
            .filter_map(|vm| vm.descendants().find(|node| node.has_tag_name("id")))
            .map(text_content)
            .collect()
    }
}

fn text_content(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(Node::is_text)
        .filter_map(|text| text.text())
        .collect::<String>()
        .trim()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{error_response, list_response};
    use rstest::rstest;

    #[rstest]
    #[case("")]
    #[case("   \n")]
    #[case("<listvirtualmachinesresponse><errortext>boom</errortext></listvirtualmachinesresponse>")]
    #[case("<a><b><c><errortext/></c></b><id>1</id></a>")]
    fn contains_error_detects_error_envelopes(#[case] body: &str) {
        assert!(contains_error(body).expect("parse"));
    }

    #[rstest]
    #[case("<deployvirtualmachineresponse><id>42</id><jobid>7</jobid></deployvirtualmachineresponse>")]
    #[case("<listvirtualmachinesresponse count=\"0\"/>")]
    fn contains_error_is_false_without_error_text(#[case] body: &str) {
        assert!(!contains_error(body).expect("parse"));
    }

    #[rstest]
    fn malformed_body_is_a_parse_failure_with_body() {
        let err = contains_error("<unterminated>").expect_err("should not parse");
        assert!(matches!(err, CloudStackError::Parse { .. }));
        assert!(err.to_string().contains("<unterminated>"));
    }

    #[rstest]
    fn error_text_reads_first_error_element() {
        let body = error_response(431, "  Unable to find virtual machine  ");
        assert_eq!(
            error_text(&body).expect("error text"),
            "Unable to find virtual machine"
        );
    }

    #[rstest]
    fn error_text_reports_null_marker_for_blank_body() {
        assert_eq!(error_text(" ").expect("marker"), NULL_RESPONSE);
    }

    #[rstest]
    fn extractors_walk_nested_documents() {
        let body = list_response(&[
            ("vm-1", "Running", &["10.0.0.5", "192.168.1.9"]),
            ("vm-2", "Stopped", &[]),
        ]);
        let response = Response::parse(&body).expect("parse");
        assert_eq!(response.virtual_machine_ids(), ["vm-1", "vm-2"]);
        assert_eq!(response.first_text("state").as_deref(), Some("Running"));
        assert_eq!(response.all_texts("ipaddress"), ["10.0.0.5", "192.168.1.9"]);
        assert!(!response.has_element("jobid"));
    }

    #[rstest]
    fn require_text_names_missing_element() {
        let response = Response::parse("<r><jobid>1</jobid></r>").expect("parse");
        let err = response.require_text("id").expect_err("no id");
        assert_eq!(
            err,
            CloudStackError::MissingElement {
                element: String::from("id"),
                body: String::from("<r><jobid>1</jobid></r>"),
            }
        );
    }
}
