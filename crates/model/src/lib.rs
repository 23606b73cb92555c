//! Core domain model for RUNNA duplicate-person detection.
//!
//! This crate defines the fundamental types used throughout the system:
//! - `PartialIdentity`: The identity snapshot typed into an intake form
//! - `CandidateRecord`: A person already registered in a legajo
//! - `MatchResult`: A scored candidate with the fields that matched
//! - `AlertTier`: Severity bands derived from a match score

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Gender as recorded by the intake forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Genero {
    Masculino,
    Femenino,
    /// Any other value, including non-binary identities
    Otro,
}

impl From<&str> for Genero {
    fn from(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "MASCULINO" | "M" => Self::Masculino,
            "FEMENINO" | "F" => Self::Femenino,
            _ => Self::Otro,
        }
    }
}

/// The identity data typed so far for a person.
///
/// Every field except `nombre` and `apellido` is optional; a name-based
/// search is only meaningful once both names are non-blank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialIdentity {
    /// First name(s)
    #[serde(default)]
    pub nombre: String,

    /// Surname(s)
    #[serde(default)]
    pub apellido: String,

    /// National identity number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dni: Option<u64>,

    /// Birthdate (ISO format on the wire)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fecha_nacimiento: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genero: Option<Genero>,

    /// Self-identified (preferred) name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nombre_autopercibido: Option<String>,
}

impl PartialIdentity {
    pub fn new(nombre: impl Into<String>, apellido: impl Into<String>) -> Self {
        Self {
            nombre: nombre.into(),
            apellido: apellido.into(),
            ..Default::default()
        }
    }

    pub fn with_dni(mut self, dni: u64) -> Self {
        self.dni = Some(dni);
        self
    }

    pub fn with_fecha_nacimiento(mut self, fecha: NaiveDate) -> Self {
        self.fecha_nacimiento = Some(fecha);
        self
    }

    pub fn with_genero(mut self, genero: Genero) -> Self {
        self.genero = Some(genero);
        self
    }

    pub fn with_nombre_autopercibido(mut self, nombre: impl Into<String>) -> Self {
        self.nombre_autopercibido = Some(nombre.into());
        self
    }

    /// Both names are non-blank after trimming.
    pub fn has_full_name(&self) -> bool {
        !self.nombre.trim().is_empty() && !self.apellido.trim().is_empty()
    }
}

/// Parse a DNI typed as free text.
///
/// Dots and spaces used as thousands separators are accepted
/// ("30.111.222"). Anything else non-numeric yields `None`.
pub fn parse_dni(text: &str) -> Option<u64> {
    let digits: String = text
        .trim()
        .chars()
        .filter(|c| *c != '.' && *c != ' ')
        .collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    digits.parse().ok()
}

/// A person already registered in the system.
///
/// Display fields are passed through untouched; scoring never reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Stable unique identifier (the legajo id)
    pub id: u64,

    /// Identity data of the registered person
    #[serde(flatten)]
    pub identity: PartialIdentity,

    /// Legajo number shown to the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numero_legajo: Option<String>,

    /// Opaque display data (active measures, assigned office, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub display: BTreeMap<String, serde_json::Value>,
}

impl CandidateRecord {
    /// Create a minimal record for testing.
    pub fn new(id: u64, identity: PartialIdentity) -> Self {
        Self {
            id,
            identity,
            numero_legajo: None,
            display: BTreeMap::new(),
        }
    }
}

/// Identity fields that can contribute to a match score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    Dni,
    Nombre,
    Apellido,
    FechaNacimiento,
    Genero,
    NombreAutopercibido,
}

impl MatchField {
    /// Get a human-readable label for this field.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Dni => "DNI",
            Self::Nombre => "Nombre",
            Self::Apellido => "Apellido",
            Self::FechaNacimiento => "Fecha de nacimiento",
            Self::Genero => "Género",
            Self::NombreAutopercibido => "Nombre autopercibido",
        }
    }

    /// Parse a field name as reported by the API. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "dni" => Some(Self::Dni),
            "nombre" => Some(Self::Nombre),
            "apellido" => Some(Self::Apellido),
            "fecha_nacimiento" => Some(Self::FechaNacimiento),
            "genero" => Some(Self::Genero),
            "nombre_autopercibido" => Some(Self::NombreAutopercibido),
            _ => None,
        }
    }
}

/// A scored duplicate candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Id of the matched candidate
    pub candidate_id: u64,

    /// Match score (0.0 = unrelated, 1.0 = same person)
    pub score: f64,

    /// Fields that contributed a non-zero weight
    #[serde(default)]
    pub matched_fields: BTreeSet<MatchField>,

    /// The candidate record, when the provider returns it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<CandidateRecord>,
}

impl MatchResult {
    pub fn new(candidate_id: u64, score: f64) -> Self {
        Self {
            candidate_id,
            score,
            matched_fields: BTreeSet::new(),
            candidate: None,
        }
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = MatchField>) -> Self {
        self.matched_fields.extend(fields);
        self
    }
}

/// Severity band of a duplicate alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertTier {
    /// Practically certain duplicate
    Critica,
    /// Probable duplicate
    Alta,
    /// Possible duplicate worth reviewing
    Media,
    SinAlerta,
}

impl AlertTier {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Critica => "CRITICA",
            Self::Alta => "ALTA",
            Self::Media => "MEDIA",
            Self::SinAlerta => "SIN_ALERTA",
        }
    }

    /// Rank for ordering (higher = more urgent).
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critica => 3,
            Self::Alta => 2,
            Self::Media => 1,
            Self::SinAlerta => 0,
        }
    }
}
