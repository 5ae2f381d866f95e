//! RDF terms, quads, patches, and content-addressed identifiers.
//!
//! Triple ids are the SHA-256 of a quad's canonical N-Quads line. Blank nodes
//! are skolemized before hashing: each distinct blank node in a quad is
//! rewritten to a synthetic IRI numbered by its first position in the quad, so
//! the id does not depend on the labels a parser happened to assign.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// IRI prefix used for skolemized blank nodes.
pub const SKOLEM_PREFIX: &str = "urn:quarry:genid:";

const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
const RDF_LANG_STRING: &str =
  "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

// ─── Terms ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Term {
  Iri {
    value: String,
  },
  BlankNode {
    value: String,
  },
  Literal {
    value:    String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    datatype: Option<String>,
  },
  DefaultGraph,
}

impl Term {
  pub fn iri(value: impl Into<String>) -> Self { Self::Iri { value: value.into() } }

  pub fn blank(label: impl Into<String>) -> Self {
    Self::BlankNode { value: label.into() }
  }

  /// A plain string literal.
  pub fn literal(value: impl Into<String>) -> Self {
    Self::Literal { value: value.into(), language: None, datatype: None }
  }

  pub fn lang_literal(value: impl Into<String>, language: impl Into<String>) -> Self {
    Self::Literal {
      value:    value.into(),
      language: Some(language.into()),
      datatype: None,
    }
  }

  pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
    Self::Literal {
      value:    value.into(),
      language: None,
      datatype: Some(datatype.into()),
    }
  }

  /// The lexical value: IRI string, blank node label, or literal form.
  pub fn value(&self) -> &str {
    match self {
      Self::Iri { value } | Self::BlankNode { value } | Self::Literal { value, .. } => value,
      Self::DefaultGraph => "",
    }
  }

  pub fn is_literal(&self) -> bool { matches!(self, Self::Literal { .. }) }
}

impl Default for Term {
  fn default() -> Self { Self::DefaultGraph }
}

// ─── Quads and patches ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quad {
  pub subject:   Term,
  pub predicate: Term,
  pub object:    Term,
  #[serde(default)]
  pub graph:     Term,
}

impl Quad {
  pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
    Self { subject, predicate, object, graph: Term::DefaultGraph }
  }

  /// The skolemized N-Quads line for this quad (without trailing newline).
  pub fn canonical(&self) -> String {
    let mut skolem = Skolemizer::default();
    let mut out = String::new();
    for term in [&self.subject, &self.predicate, &self.object] {
      write_term(&mut out, term, &mut skolem);
      out.push(' ');
    }
    if !matches!(self.graph, Term::DefaultGraph) {
      write_term(&mut out, &self.graph, &mut skolem);
      out.push(' ');
    }
    out.push('.');
    out
  }

  /// Deterministic content-addressed triple id: hex SHA-256 of
  /// [`Quad::canonical`].
  pub fn triple_id(&self) -> String { sha256_hex(self.canonical().as_bytes()) }

  /// Subject as stored in a shard row. Blank nodes are stored
  /// under their skolem IRI so the row agrees with its id.
  pub fn stored_subject(&self) -> String {
    match &self.subject {
      Term::BlankNode { .. } => format!("{SKOLEM_PREFIX}0"),
      other => other.value().to_owned(),
    }
  }

  pub fn stored_object(&self) -> String {
    match (&self.subject, &self.object) {
      (Term::BlankNode { value: s }, Term::BlankNode { value: o }) if s == o => {
        format!("{SKOLEM_PREFIX}0")
      }
      (Term::BlankNode { .. }, Term::BlankNode { .. }) => format!("{SKOLEM_PREFIX}1"),
      (_, Term::BlankNode { .. }) => format!("{SKOLEM_PREFIX}0"),
      (_, other) => other.value().to_owned(),
    }
  }

  /// The literal text to chunk and embed, if the object is a non-empty
  /// literal.
  pub fn object_text(&self) -> Option<&str> {
    match &self.object {
      Term::Literal { value, .. } if !value.is_empty() => Some(value),
      _ => None,
    }
  }
}

/// One unit of change: quads to remove and quads to add, applied in that
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
  #[serde(default)]
  pub insertions: Vec<Quad>,
  #[serde(default)]
  pub deletions:  Vec<Quad>,
}

impl Patch {
  pub fn insert(quads: impl IntoIterator<Item = Quad>) -> Self {
    Self { insertions: quads.into_iter().collect(), deletions: vec![] }
  }

  pub fn delete(quads: impl IntoIterator<Item = Quad>) -> Self {
    Self { insertions: vec![], deletions: quads.into_iter().collect() }
  }

  pub fn is_empty(&self) -> bool { self.insertions.is_empty() && self.deletions.is_empty() }
}

// ─── Stored rows ─────────────────────────────────────────────────────────────

/// A triple as stored in a shard. `id` is [`Quad::triple_id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triple {
  pub id:        String,
  pub subject:   String,
  pub predicate: String,
  pub object:    String,
}

/// A bounded fragment of a triple's literal object with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
  pub id:        String,
  pub triple_id: String,
  pub subject:   String,
  pub predicate: String,
  pub text:      String,
  pub vector:    Vec<f32>,
}

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Stable id of the `index`-th chunk of a triple.
pub fn chunk_id(triple_id: &str, index: usize) -> String {
  sha256_hex(format!("{triple_id}:chunk:{index}").as_bytes())
}

pub fn sha256_hex(bytes: &[u8]) -> String { hex::encode(Sha256::digest(bytes)) }

// ─── Canonical serialisation ─────────────────────────────────────────────────

#[derive(Default)]
struct Skolemizer {
  seen: Vec<String>,
}

impl Skolemizer {
  fn iri_for(&mut self, label: &str) -> String {
    let index = match self.seen.iter().position(|l| l == label) {
      Some(i) => i,
      None => {
        self.seen.push(label.to_owned());
        self.seen.len() - 1
      }
    };
    format!("{SKOLEM_PREFIX}{index}")
  }
}

fn write_term(out: &mut String, term: &Term, skolem: &mut Skolemizer) {
  match term {
    Term::Iri { value } => write_iri(out, value),
    Term::BlankNode { value } => {
      let iri = skolem.iri_for(value);
      write_iri(out, &iri);
    }
    Term::Literal { value, language, datatype } => {
      out.push('"');
      for c in value.chars() {
        match c {
          '"' => out.push_str("\\\""),
          '\\' => out.push_str("\\\\"),
          '\n' => out.push_str("\\n"),
          '\r' => out.push_str("\\r"),
          c => out.push(c),
        }
      }
      out.push('"');
      match (language, datatype.as_deref()) {
        (Some(lang), _) => {
          out.push('@');
          out.push_str(&lang.to_ascii_lowercase());
        }
        (None, None | Some(XSD_STRING) | Some(RDF_LANG_STRING)) => {}
        (None, Some(dt)) => {
          out.push_str("^^");
          write_iri(out, dt);
        }
      }
    }
    Term::DefaultGraph => {}
  }
}

fn write_iri(out: &mut String, iri: &str) {
  out.push('<');
  for c in iri.chars() {
    match c {
      '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\' => {
        let _ = write!(out, "\\u{:04X}", c as u32);
      }
      c if c <= ' ' => {
        let _ = write!(out, "\\u{:04X}", c as u32);
      }
      c => out.push(c),
    }
  }
  out.push('>');
}
