//! Staged product-name resolution against the catalog.
//!
//! Given the model's predicted product name, the raw user query, and the
//! recent conversation history, resolve to at most one catalog entry.
//! Stages run in strict priority order and return on first success:
//!
//! 1. History short-circuit — a product discussed in the last two turns
//!    resolves even when the predicted entity differs from the catalog
//!    spelling.
//! 2. Exact normalized match on the predicted name.
//! 3. Fuzzy match on the predicted name (entry floor 90, accept 85).
//! 4. Exact normalized match on the raw query.
//! 5. Fuzzy match on the raw query (entry floor 85, accept 75).
//! 6. No match — a valid [`MatchResult::none`], never an error.
//!
//! The fuzzy stages prefilter with [`partial_ratio`], then blend
//! partial, token-set, and full ratios into a combined score with a
//! first-letter bonus. The predicted-name stage trusts the extraction
//! more: it is harder to enter but easier to accept; the raw-query
//! stage compensates for noisier input with the opposite tiering. All
//! thresholds live in [`ResolverConfig`].

use tracing::debug;

use crate::config::ResolverConfig;
use crate::models::{HistoryRecord, MatchResult, Product};
use crate::similarity::{partial_ratio, ratio, token_set_ratio};

/// Lowercase with whitespace runs collapsed to single spaces.
pub fn normalize(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Thresholds for one fuzzy stage.
struct FuzzyParams {
    entry_floor: f64,
    token_floor: f64,
    full_floor: f64,
    accept: f64,
}

pub struct ProductResolver {
    config: ResolverConfig,
}

impl ProductResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Resolve a product reference. `history` must be ordered
    /// most-recent-first; only the first `history_depth` records are
    /// consulted.
    pub fn resolve(
        &self,
        user_query: &str,
        history: &[HistoryRecord],
        predicted_name: &str,
        catalog: &[Product],
    ) -> MatchResult {
        let clean_query = normalize(user_query);
        let clean_predicted = normalize(predicted_name);

        if let Some(found) =
            self.match_history(&clean_query, &clean_predicted, history, catalog)
        {
            debug!(product = ?found.product_name, "resolved from recent history");
            return found;
        }

        if !clean_predicted.is_empty() {
            if let Some(found) = exact_match(&clean_predicted, catalog) {
                debug!(product = %found.product_name.as_deref().unwrap_or(""), "exact match on predicted name");
                return found;
            }

            let params = FuzzyParams {
                entry_floor: self.config.predicted_floor,
                token_floor: self.config.predicted_token_floor,
                full_floor: self.config.predicted_full_floor,
                accept: self.config.predicted_accept,
            };
            if let Some(found) = self.fuzzy_match(&clean_predicted, predicted_name, catalog, &params)
            {
                debug!(product = %found.product_name.as_deref().unwrap_or(""), "fuzzy match on predicted name");
                return found;
            }
        }

        if let Some(found) = exact_match(&clean_query, catalog) {
            debug!(product = %found.product_name.as_deref().unwrap_or(""), "exact match on query");
            return found;
        }

        let params = FuzzyParams {
            entry_floor: self.config.query_floor,
            token_floor: self.config.query_token_floor,
            full_floor: self.config.query_full_floor,
            accept: self.config.query_accept,
        };
        if let Some(found) = self.fuzzy_match(&clean_query, user_query, catalog, &params) {
            debug!(product = %found.product_name.as_deref().unwrap_or(""), "fuzzy match on query");
            return found;
        }

        MatchResult::none()
    }

    /// Stage 1: scan the most recent history records. If the predicted
    /// name or the query appears inside a stored question or answer, the
    /// match is keyed by that record's question text; the id comes from
    /// an exact catalog-name lookup and may be absent.
    fn match_history(
        &self,
        clean_query: &str,
        clean_predicted: &str,
        history: &[HistoryRecord],
        catalog: &[Product],
    ) -> Option<MatchResult> {
        for record in history.iter().take(self.config.history_depth) {
            let question = record.question.to_lowercase();
            let answer = record.answer.to_lowercase();

            if question.contains(clean_predicted)
                || answer.contains(clean_predicted)
                || question.contains(clean_query)
                || answer.contains(clean_query)
            {
                let product_id = catalog
                    .iter()
                    .find(|p| p.name == record.question)
                    .map(|p| p.id.clone());
                return Some(MatchResult {
                    product_name: Some(record.question.clone()),
                    product_id,
                });
            }
        }
        None
    }

    /// The shared fuzzy stage. `needle_clean` drives the partial-ratio
    /// prefilter; `needle_raw` drives the per-candidate token-set and
    /// full ratios and the first-letter bonus, matching how the
    /// thresholds were tuned.
    fn fuzzy_match(
        &self,
        needle_clean: &str,
        needle_raw: &str,
        catalog: &[Product],
        params: &FuzzyParams,
    ) -> Option<MatchResult> {
        let needle_lower = needle_raw.to_lowercase();

        let mut candidates: Vec<(&Product, f64)> = catalog
            .iter()
            .map(|p| (p, partial_ratio(needle_clean, &normalize(&p.name))))
            .filter(|(_, score)| *score >= params.entry_floor)
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(self.config.candidate_limit);

        let mut scored: Vec<(&Product, f64)> = Vec::new();
        for (product, partial_score) in candidates {
            let name_lower = product.name.to_lowercase();
            let token_score = token_set_ratio(&name_lower, &needle_lower);
            let full_score = ratio(&name_lower, &needle_lower);

            if token_score < params.token_floor && full_score < params.full_floor {
                continue;
            }

            let mut combined = partial_score * self.config.partial_weight
                + token_score * self.config.token_weight
                + full_score * self.config.full_weight;

            if first_letters_match(&product.name, needle_raw) {
                combined += self.config.first_letter_bonus;
            }

            scored.push((product, combined));
        }

        // Descending by combined score; the stable sort keeps catalog
        // order on exact ties.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        match scored.first() {
            Some((product, combined)) if *combined >= params.accept => Some(MatchResult {
                product_name: Some(product.name.clone()),
                product_id: Some(product.id.clone()),
            }),
            _ => None,
        }
    }
}

/// Diagnostic LLM-based name matcher.
///
/// Runs the same matching question through the model and returns its
/// pick. Only ever invoked as a logged side path next to the
/// deterministic resolver; its result is never used downstream.
pub async fn llm_name_match(
    chat: &dyn crate::completion::ChatModel,
    model: &str,
    user_query: &str,
    history: &str,
    predicted_name: &str,
    catalog: &[Product],
) -> anyhow::Result<MatchResult> {
    use crate::prompts::{NAME_MATCHER_SYS_PROMPT, NAME_MATCHER_USER_TEMPLATE};

    let valid_names = catalog
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let user = NAME_MATCHER_USER_TEMPLATE
        .replace("{valid_names}", &valid_names)
        .replace("{predicted_name}", predicted_name)
        .replace("{history}", history)
        .replace("{question}", user_query);

    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "product_name": {
                "type": "string",
                "description": "Closest valid product name for the predicted name."
            }
        },
        "required": ["product_name"],
        "additionalProperties": false
    });

    let content = chat
        .complete(crate::completion::ChatRequest {
            model: model.to_string(),
            system: NAME_MATCHER_SYS_PROMPT.to_string(),
            user: crate::completion::UserContent::Text(user),
            temperature: 0.0,
            max_tokens: None,
            response_schema: Some(("name_match".to_string(), schema)),
        })
        .await?;

    let parsed: serde_json::Value = serde_json::from_str(&content)?;
    let name = parsed
        .get("product_name")
        .and_then(|n| n.as_str())
        .unwrap_or_default()
        .to_string();

    let product_id = catalog
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.id.clone());

    Ok(MatchResult {
        product_name: (!name.is_empty()).then_some(name),
        product_id,
    })
}

fn exact_match(needle: &str, catalog: &[Product]) -> Option<MatchResult> {
    catalog
        .iter()
        .find(|p| normalize(&p.name) == needle)
        .map(|p| MatchResult {
            product_name: Some(p.name.clone()),
            product_id: Some(p.id.clone()),
        })
}

fn first_letters_match(a: &str, b: &str) -> bool {
    match (a.chars().next(), b.chars().next()) {
        (Some(x), Some(y)) => x.to_lowercase().eq(y.to_lowercase()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;

    fn resolver() -> ProductResolver {
        ProductResolver::new(ResolverConfig::default())
    }

    fn catalog(entries: &[(&str, &str)]) -> Vec<Product> {
        entries
            .iter()
            .map(|(id, name)| Product {
                id: id.to_string(),
                name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize("  Allianz   Index\tAdvantage "), "allianz index advantage");
    }

    #[test]
    fn exact_normalized_predicted_name_matches() {
        let catalog = catalog(&[("1", "Allianz Index Advantage Income")]);
        let result = resolver().resolve(
            "who issues it?",
            &[],
            "allianz index advantage income",
            &catalog,
        );
        assert_eq!(result.product_id.as_deref(), Some("1"));
        assert_eq!(
            result.product_name.as_deref(),
            Some("Allianz Index Advantage Income")
        );
    }

    #[test]
    fn typo_resolves_through_fuzzy_stage() {
        let catalog = catalog(&[("2", "Thrivent Variable Choice")]);
        let result = resolver().resolve(
            "what are the fees?",
            &[],
            "Thrivent Variabl Choic",
            &catalog,
        );
        assert_eq!(result.product_id.as_deref(), Some("2"));
    }

    #[test]
    fn no_product_yields_empty_match() {
        let catalog = catalog(&[("9", "Jackson Market Link Pro")]);
        let result = resolver().resolve("what is a fixed annuity", &[], "", &catalog);
        assert_eq!(result, MatchResult::none());
    }

    #[test]
    fn history_short_circuits_fuzzy_stages() {
        let history = vec![HistoryRecord {
            question: "Tell me about Product X".to_string(),
            answer: "Product X details...".to_string(),
        }];
        let result = resolver().resolve("what about its riders?", &history, "Product X", &[]);
        assert_eq!(
            result.product_name.as_deref(),
            Some("Tell me about Product X")
        );
        assert_eq!(result.product_id, None);
    }

    #[test]
    fn history_match_looks_up_catalog_id_by_exact_question() {
        let history = vec![HistoryRecord {
            question: "Product X".to_string(),
            answer: "It is a variable annuity.".to_string(),
        }];
        let catalog = catalog(&[("41", "Product X")]);
        let result = resolver().resolve("more please", &history, "Product X", &catalog);
        assert_eq!(result.product_id.as_deref(), Some("41"));
    }

    #[test]
    fn history_is_scanned_most_recent_first() {
        let history = vec![
            HistoryRecord {
                question: "Newest Product".to_string(),
                answer: "about the newest".to_string(),
            },
            HistoryRecord {
                question: "Older Product".to_string(),
                answer: "about the older".to_string(),
            },
        ];
        // Both records contain the query; the most recent one wins.
        let result = resolver().resolve("about", &history, "", &[]);
        assert_eq!(result.product_name.as_deref(), Some("Newest Product"));
    }

    #[test]
    fn returned_id_is_always_from_the_catalog_or_none() {
        let catalog = catalog(&[("1", "Allianz Index Advantage Income"), ("2", "Thrivent Variable Choice")]);
        let queries = [
            ("thrivent variable choice", ""),
            ("something unrelated entirely", "Allianz Index Advntage Income"),
            ("what is a mystery product", "Mystery Product 3000"),
        ];
        for (query, predicted) in queries {
            let result = resolver().resolve(query, &[], predicted, &catalog);
            if let Some(id) = &result.product_id {
                assert!(catalog.iter().any(|p| &p.id == id), "foreign id {id}");
            }
        }
    }

    #[test]
    fn exact_query_match_beats_fuzzy_query_stage() {
        let catalog = catalog(&[("7", "Brighthouse Shield Level Select")]);
        let result = resolver().resolve("brighthouse  shield level SELECT", &[], "", &catalog);
        assert_eq!(result.product_id.as_deref(), Some("7"));
    }

    #[test]
    fn dissimilar_predicted_name_is_rejected() {
        let catalog = catalog(&[("1", "Allianz Index Advantage Income")]);
        let result = resolver().resolve(
            "how do withdrawals work",
            &[],
            "Pacific Odyssey Deferred",
            &catalog,
        );
        assert_eq!(result, MatchResult::none());
    }

    #[test]
    fn thresholds_are_honored_from_config() {
        // Raising the acceptance bar above any attainable score turns a
        // previously-passing typo match into a miss.
        let mut config = ResolverConfig::default();
        config.predicted_accept = 150.0;
        let strict = ProductResolver::new(config);
        let catalog = catalog(&[("2", "Thrivent Variable Choice")]);
        let result = strict.resolve("fees?", &[], "Thrivent Variabl Choic", &catalog);
        assert_eq!(result, MatchResult::none());
    }
}
