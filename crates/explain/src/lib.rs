//! Alert classification and explanations for duplicate matches.
//!
//! Maps match scores to alert tiers and converts matched fields into
//! human-readable explanations suitable for display in the intake forms.

use runna_model::{AlertTier, MatchField, MatchResult};
use serde::{Deserialize, Serialize};

/// Minimum score for a critical alert (exact DNI or equivalent).
pub const CRITICA_THRESHOLD: f64 = 1.0;
/// Minimum score for a high alert.
pub const ALTA_THRESHOLD: f64 = 0.75;
/// Minimum score for a medium alert.
pub const MEDIA_THRESHOLD: f64 = 0.50;

/// Classify a score into an alert tier.
///
/// Comparisons are inclusive and checked from the highest tier down.
pub fn classify(score: f64) -> AlertTier {
    if score >= CRITICA_THRESHOLD {
        AlertTier::Critica
    } else if score >= ALTA_THRESHOLD {
        AlertTier::Alta
    } else if score >= MEDIA_THRESHOLD {
        AlertTier::Media
    } else {
        AlertTier::SinAlerta
    }
}

/// Palette color name used to render a tier.
pub fn color_for(tier: AlertTier) -> &'static str {
    match tier {
        AlertTier::Critica => "error",
        AlertTier::Alta => "warning",
        AlertTier::Media => "info",
        AlertTier::SinAlerta => "success",
    }
}

/// Hex color used to render a tier outside the palette.
pub fn hex_for(tier: AlertTier) -> &'static str {
    match tier {
        AlertTier::Critica => "#d32f2f",
        AlertTier::Alta => "#ed6c02",
        AlertTier::Media => "#0288d1",
        AlertTier::SinAlerta => "#2e7d32",
    }
}

/// Presentation strings for a tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMessage {
    pub title: &'static str,
    pub subtitle: &'static str,
    pub recommendation: &'static str,
}

/// Presentation strings shown with each tier.
pub fn message_for(tier: AlertTier) -> AlertMessage {
    match tier {
        AlertTier::Critica => AlertMessage {
            title: "Coincidencia exacta",
            subtitle: "Ya existe un legajo para esta persona",
            recommendation: "Vincule la demanda al legajo existente en lugar de crear uno nuevo.",
        },
        AlertTier::Alta => AlertMessage {
            title: "Alta probabilidad de duplicado",
            subtitle: "Los datos coinciden en gran medida con un legajo existente",
            recommendation: "Revise el legajo sugerido antes de continuar.",
        },
        AlertTier::Media => AlertMessage {
            title: "Posible duplicado",
            subtitle: "Algunos datos coinciden con un legajo existente",
            recommendation: "Verifique los datos ingresados y compare con los legajos sugeridos.",
        },
        AlertTier::SinAlerta => AlertMessage {
            title: "Sin coincidencias",
            subtitle: "No se encontraron legajos similares",
            recommendation: "Puede continuar con la carga.",
        },
    }
}

/// A structured explanation for a duplicate match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    /// Short summary (1 line)
    pub summary: String,

    /// Detailed explanation
    pub detail: String,

    pub tier: AlertTier,

    /// Evidence items supporting this explanation
    pub evidence: Vec<EvidenceItem>,
}

/// A field that supports a match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Field that matched
    pub field: MatchField,

    /// The candidate's value, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Generate the explanation for a scored candidate.
pub fn explain_match(result: &MatchResult) -> Explanation {
    let tier = classify(result.score);
    let message = message_for(tier);

    let evidence = result
        .matched_fields
        .iter()
        .map(|field| EvidenceItem {
            field: *field,
            value: candidate_value(result, *field),
        })
        .collect::<Vec<_>>();

    let labels: Vec<_> = result.matched_fields.iter().map(|f| f.label()).collect();
    let detail = if labels.is_empty() {
        format!("{}. No hay campos coincidentes.", message.subtitle)
    } else {
        format!(
            "{} (coincidencia {:.0}%): {}.",
            message.subtitle,
            result.score * 100.0,
            labels.join(", ")
        )
    };

    Explanation {
        summary: format!("{}: {}", tier.label(), message.title),
        detail,
        tier,
        evidence,
    }
}

fn candidate_value(result: &MatchResult, field: MatchField) -> Option<String> {
    let identity = &result.candidate.as_ref()?.identity;
    match field {
        MatchField::Dni => identity.dni.map(|d| d.to_string()),
        MatchField::Nombre => Some(identity.nombre.clone()),
        MatchField::Apellido => Some(identity.apellido.clone()),
        MatchField::FechaNacimiento => identity.fecha_nacimiento.map(|d| d.to_string()),
        MatchField::Genero => identity.genero.map(|g| format!("{:?}", g)),
        MatchField::NombreAutopercibido => identity.nombre_autopercibido.clone(),
    }
}

/// Highest tier found among a set of results.
pub fn highest_tier(results: &[MatchResult]) -> AlertTier {
    results
        .iter()
        .map(|r| classify(r.score))
        .max_by_key(|t| t.rank())
        .unwrap_or(AlertTier::SinAlerta)
}

/// Generate a combined one-line summary for a set of results.
pub fn summarize(results: &[MatchResult]) -> String {
    let tier = highest_tier(results);
    if tier == AlertTier::SinAlerta {
        return message_for(tier).subtitle.to_string();
    }

    let alerted = results
        .iter()
        .filter(|r| classify(r.score) != AlertTier::SinAlerta)
        .count();
    format!("{}: {} posible(s) duplicado(s)", tier.label(), alerted)
}
