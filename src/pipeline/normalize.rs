//! Field normalization: raw service labels → fixed table columns.
//!
//! Custom models are trained by hand and their field names drift between
//! Portuguese and English, with and without accents. The [`COLUMN_TABLE`]
//! lists, per canonical column, the labels accepted for it in priority order.
//! The first label present wins; the rest are not consulted.
//!
//! Keys must already be lower-cased (the analysis stage does that). No case
//! folding happens here, so `"Endereco"` does not match `"endereco"`.

use crate::output::{Column, FixedRecord, RawFieldMap};
use crate::pipeline::phone::format_phone;

/// How a matched raw value is turned into the cell value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFormat {
    /// Use the text as extracted.
    Verbatim,
    /// Run it through [`format_phone`].
    Phone,
}

impl FieldFormat {
    pub fn apply(self, raw: &str) -> String {
        match self {
            FieldFormat::Verbatim => raw.to_string(),
            FieldFormat::Phone => format_phone(raw),
        }
    }
}

/// One row of the mapping table.
#[derive(Debug)]
pub struct ColumnRule {
    pub column: Column,
    pub synonyms: &'static [&'static str],
    pub format: FieldFormat,
}

/// Canonical columns with their accepted labels, in export order.
pub static COLUMN_TABLE: [ColumnRule; 5] = [
    ColumnRule {
        column: Column::Nome,
        synonyms: &["nome", "name", "nome_paciente"],
        format: FieldFormat::Verbatim,
    },
    ColumnRule {
        column: Column::Data,
        synonyms: &["data", "date", "data de nascimento"],
        format: FieldFormat::Verbatim,
    },
    ColumnRule {
        column: Column::Fone,
        synonyms: &["fone", "telefone", "telefone fixo"],
        format: FieldFormat::Phone,
    },
    ColumnRule {
        column: Column::Cel,
        synonyms: &["cel", "celular", "mobile"],
        format: FieldFormat::Phone,
    },
    ColumnRule {
        column: Column::Address,
        synonyms: &["address", "endereço", "endereco"],
        format: FieldFormat::Verbatim,
    },
];

/// Map a flattened field set onto the fixed schema.
///
/// Total: every column is filled, with `"N/A"` when none of its labels is
/// present. An empty map yields an all-`"N/A"` record.
pub fn normalize(raw: &RawFieldMap) -> FixedRecord {
    let mut record = FixedRecord::default();
    for rule in &COLUMN_TABLE {
        if let Some(value) = rule.synonyms.iter().find_map(|label| raw.get(label)) {
            record.set(rule.column, rule.format.apply(value));
        }
    }
    record
}
