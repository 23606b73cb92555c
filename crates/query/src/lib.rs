//! Query preparation for duplicate searches.
//!
//! Decides whether a `PartialIdentity` is worth searching for, derives the
//! fingerprint used to suppress repeated queries, and translates the
//! identity into backend-specific request bodies.

use chrono::NaiveDate;
use runna_model::PartialIdentity;
use serde::Serialize;
use thiserror::Error;

/// Default minimum length for a duplicate-override justification.
pub const DEFAULT_MIN_JUSTIFICATION_LENGTH: usize = 20;

#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("Insufficient input: a valid DNI or both nombre and apellido are required")]
    InsufficientInput,
    #[error("Justification too short: {actual} characters, at least {required} required")]
    JustificationTooShort { actual: usize, required: usize },
}

/// How a search should be executed once it passes the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    /// A complete DNI is unambiguous: search right away
    Immediate,
    /// Name-based search: wait for typing to settle
    Debounced,
}

/// Check that a DNI has exactly 8 digits.
pub fn is_valid_dni(dni: u64) -> bool {
    (10_000_000..=99_999_999).contains(&dni)
}

/// Decide whether an identity snapshot has enough data to search.
///
/// A valid DNI alone is sufficient, independently of name quality.
pub fn should_search(partial: &PartialIdentity) -> Result<SearchKind, QueryError> {
    if partial.dni.is_some_and(is_valid_dni) {
        return Ok(SearchKind::Immediate);
    }

    if partial.has_full_name() {
        return Ok(SearchKind::Debounced);
    }

    Err(QueryError::InsufficientInput)
}

#[derive(Serialize)]
struct FingerprintKey<'a> {
    dni: Option<u64>,
    nombre: &'a str,
    apellido: &'a str,
    fecha_nacimiento: Option<NaiveDate>,
}

/// Stable fingerprint of the fields that determine a search.
///
/// Gender and self-identified name do not change which records the
/// backend returns and are left out.
pub fn fingerprint(partial: &PartialIdentity) -> String {
    let key = FingerprintKey {
        dni: partial.dni,
        nombre: partial.nombre.trim(),
        apellido: partial.apellido.trim(),
        fecha_nacimiento: partial.fecha_nacimiento,
    };

    // Serializing a struct of plain fields cannot fail.
    serde_json::to_string(&key).unwrap_or_default()
}

/// Enforce the minimum justification length for overriding a duplicate alert.
pub fn check_justification(text: &str, min_len: usize) -> Result<(), QueryError> {
    let actual = text.trim().chars().count();
    if actual < min_len {
        return Err(QueryError::JustificationTooShort {
            actual,
            required: min_len,
        });
    }
    Ok(())
}

/// Trait for translating queries to backend-specific syntax.
pub trait QueryDialect {
    /// The output type (usually a JSON body or a query string)
    type Output;

    /// Translate a PartialIdentity to this dialect
    fn translate(&self, query: &PartialIdentity) -> Result<Self::Output, QueryError>;
}

/// Request body of the RUNNA `buscar-duplicados` endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DuplicateSearchBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dni: Option<u64>,
    pub nombre: String,
    pub apellido: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fecha_nacimiento: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genero: Option<runna_model::Genero>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nombre_autopercibido: Option<String>,
}

/// JSON dialect for the RUNNA REST API.
#[derive(Debug, Default)]
pub struct RunnaDialect;

impl QueryDialect for RunnaDialect {
    type Output = DuplicateSearchBody;

    fn translate(&self, query: &PartialIdentity) -> Result<DuplicateSearchBody, QueryError> {
        should_search(query)?;

        // Invalid DNIs are dropped rather than sent.
        let dni = query.dni.filter(|d| is_valid_dni(*d));

        let nombre_autopercibido = query
            .nombre_autopercibido
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(DuplicateSearchBody {
            dni,
            nombre: query.nombre.trim().to_string(),
            apellido: query.apellido.trim().to_string(),
            fecha_nacimiento: query.fecha_nacimiento,
            genero: query.genero,
            nombre_autopercibido,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use runna_model::Genero;

    #[test]
    fn test_dni_format() {
        assert!(is_valid_dni(30111222));
        assert!(!is_valid_dni(3011122));
        assert!(!is_valid_dni(301112223));
        assert!(!is_valid_dni(0));
    }

    #[test]
    fn test_should_search_with_dni_only() {
        let partial = PartialIdentity {
            dni: Some(30111222),
            ..Default::default()
        };
        assert_eq!(should_search(&partial), Ok(SearchKind::Immediate));
    }

    #[test]
    fn test_should_search_with_names() {
        let partial = PartialIdentity::new(" Juan ", "Perez");
        assert_eq!(should_search(&partial), Ok(SearchKind::Debounced));
    }

    #[test]
    fn test_should_search_short_dni_falls_back_to_names() {
        let partial = PartialIdentity::new("Juan", "Perez").with_dni(1234);
        assert_eq!(should_search(&partial), Ok(SearchKind::Debounced));

        let partial = PartialIdentity {
            dni: Some(1234),
            ..Default::default()
        };
        assert_eq!(should_search(&partial), Err(QueryError::InsufficientInput));
    }

    #[test]
    fn test_should_search_missing_apellido() {
        let partial = PartialIdentity::new("J", "");
        assert_eq!(should_search(&partial), Err(QueryError::InsufficientInput));
    }

    #[test]
    fn test_fingerprint_ignores_surrounding_whitespace() {
        let a = PartialIdentity::new("Juan", "Perez");
        let b = PartialIdentity::new("  Juan", "Perez  ");
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_changes_with_dni() {
        let a = PartialIdentity::new("Juan", "Perez");
        let b = a.clone().with_dni(30111222);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_ignores_genero() {
        let a = PartialIdentity::new("Juan", "Perez");
        let b = a.clone().with_genero(Genero::Masculino);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_check_justification() {
        assert!(check_justification("Son hermanos mellizos con igual nombre", 20).is_ok());
        assert_eq!(
            check_justification("   corto   ", DEFAULT_MIN_JUSTIFICATION_LENGTH),
            Err(QueryError::JustificationTooShort {
                actual: 5,
                required: 20
            })
        );
    }

    #[test]
    fn test_runna_dialect_body() {
        let query = PartialIdentity::new(" Ana ", "Gómez")
            .with_dni(123)
            .with_nombre_autopercibido("  ");
        let body = RunnaDialect.translate(&query).unwrap();

        assert_eq!(body.nombre, "Ana");
        assert_eq!(body.dni, None);
        assert_eq!(body.nombre_autopercibido, None);

        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("dni").is_none());
        assert_eq!(json["apellido"], "Gómez");
    }

    #[test]
    fn test_runna_dialect_rejects_empty() {
        let query = PartialIdentity::new("   ", "");
        assert_eq!(
            RunnaDialect.translate(&query),
            Err(QueryError::InsufficientInput)
        );
    }
}
