//! Built-in opinion catalog

pub mod bigquery;
pub mod documentation;
pub mod lineage;
pub mod modelling;
pub mod privacy;

use crate::opinion::OpinionBox;
use opiner_core::{Config, ConfigError};

/// Constructor of a built-in opinion
pub type BuildOpinion = fn(&Config) -> Result<OpinionBox, ConfigError>;

/// Entry of the built-in catalog
#[derive(Clone, Copy)]
pub struct BuiltinOpinion {
    pub code: &'static str,
    pub build: BuildOpinion,
}

/// Every built-in opinion, sorted by code
pub const BUILTIN_OPINIONS: &[BuiltinOpinion] = &[
    BuiltinOpinion { code: "BQ001", build: bigquery::MaximumBytesBilled::build },
    BuiltinOpinion { code: "BQ002", build: bigquery::TablesClustered::build },
    BuiltinOpinion { code: "BQ003", build: bigquery::ViewsDocumentLayout::build },
    BuiltinOpinion { code: "BQ004", build: bigquery::PersistDocs::build },
    BuiltinOpinion { code: "D001", build: documentation::DocsFileNodeLimit::build },
    BuiltinOpinion { code: "L001", build: lineage::SourcesOnlyInStaging::build },
    BuiltinOpinion { code: "L002", build: lineage::LayerDirectionality::build },
    BuiltinOpinion { code: "O001", build: documentation::ModelHasDescription::build },
    BuiltinOpinion { code: "O002", build: documentation::DescriptionKeywords::build },
    BuiltinOpinion { code: "O003", build: documentation::ColumnsHaveDescription::build },
    BuiltinOpinion { code: "O004", build: modelling::ExplicitFinalColumns::build },
    BuiltinOpinion { code: "O005", build: modelling::UniqueKeyDefined::build },
    BuiltinOpinion { code: "O006", build: modelling::LayerPrefix::build },
    BuiltinOpinion { code: "O007", build: documentation::NoOutdatedColumns::build },
    BuiltinOpinion { code: "P001", build: privacy::PiiColumnsTagged::build },
    BuiltinOpinion { code: "P002", build: privacy::NoAnonymousStats::build },
];

/// Codes of the built-in opinions
pub fn builtin_codes() -> impl Iterator<Item = &'static str> {
    BUILTIN_OPINIONS.iter().map(|b| b.code)
}

pub fn is_builtin(code: &str) -> bool {
    builtin_codes().any(|c| c == code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opinion::Opinion;

    #[test]
    fn catalog_is_sorted_and_unique() {
        let codes: Vec<_> = builtin_codes().collect();
        let mut sorted = codes.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(codes, sorted);
    }

    #[test]
    fn every_entry_builds_with_its_own_code() {
        let config = Config::from_str("sql_dialect: bigquery\n").unwrap();
        for entry in BUILTIN_OPINIONS {
            let opinion = (entry.build)(&config).unwrap();
            assert_eq!(opinion.code(), entry.code);
            assert!(!opinion.tags().is_empty());
        }
    }
}
