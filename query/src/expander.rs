use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Built-in acronym table; callers can layer their own entries on top.
const BUILTIN_ACRONYMS: &[(&str, &str)] = &[
    ("ai", "artificial intelligence"),
    ("ml", "machine learning"),
    ("dl", "deep learning"),
    ("nlp", "natural language processing"),
    ("llm", "large language model"),
    ("rag", "retrieval augmented generation"),
    ("nn", "neural network"),
    ("cnn", "convolutional neural network"),
    ("rnn", "recurrent neural network"),
    ("gan", "generative adversarial network"),
    ("ocr", "optical character recognition"),
    ("tts", "text to speech"),
    ("asr", "automatic speech recognition"),
    ("api", "application programming interface"),
    ("sdk", "software development kit"),
    ("cli", "command line interface"),
    ("ide", "integrated development environment"),
    ("ui", "user interface"),
    ("ux", "user experience"),
    ("db", "database"),
    ("sql", "structured query language"),
    ("etl", "extract transform load"),
    ("os", "operating system"),
    ("vm", "virtual machine"),
    ("cpu", "central processing unit"),
    ("gpu", "graphics processing unit"),
    ("ram", "random access memory"),
    ("ssd", "solid state drive"),
    ("http", "hypertext transfer protocol"),
    ("https", "hypertext transfer protocol secure"),
    ("url", "uniform resource locator"),
    ("dns", "domain name system"),
    ("tcp", "transmission control protocol"),
    ("udp", "user datagram protocol"),
    ("ip", "internet protocol"),
    ("tls", "transport layer security"),
    ("ssl", "secure sockets layer"),
    ("ssh", "secure shell"),
    ("json", "javascript object notation"),
    ("xml", "extensible markup language"),
    ("html", "hypertext markup language"),
    ("css", "cascading style sheets"),
    ("rest", "representational state transfer"),
    ("grpc", "remote procedure call"),
    ("ci", "continuous integration"),
    ("cd", "continuous deployment"),
    ("k8s", "kubernetes"),
    ("aws", "amazon web services"),
    ("gcp", "google cloud platform"),
    ("iot", "internet of things"),
    ("ar", "augmented reality"),
    ("vr", "virtual reality"),
];

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "of", "for", "in", "on",
    "at", "to", "from", "with", "by", "and", "or", "not", "no", "it", "its", "this", "that",
    "these", "those", "what", "which", "who", "how", "why", "when", "where", "do", "does", "did",
    "can", "could", "should", "would", "will", "about",
];

/// External synonym source. Lookups are bounded by the caller-supplied limit.
pub trait SynonymLexicon: Send + Sync {
    fn synonyms(&self, term: &str, limit: usize) -> Vec<String>;
}

/// In-memory lexicon backed by a fixed table.
pub struct StaticLexicon {
    entries: HashMap<String, Vec<String>>,
}

impl StaticLexicon {
    pub fn from_entries<I, S, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<T>)>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(term, synonyms)| {
                    (
                        term.into().to_lowercase(),
                        synonyms.into_iter().map(Into::into).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl SynonymLexicon for StaticLexicon {
    fn synonyms(&self, term: &str, limit: usize) -> Vec<String> {
        self.entries
            .get(&term.to_lowercase())
            .map(|synonyms| synonyms.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct ExpansionConfig {
    pub enable_synonyms: bool,
    /// Synonyms appended per content term, at most.
    pub max_expansions: usize,
    pub extra_acronyms: HashMap<String, String>,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            enable_synonyms: true,
            max_expansions: 2,
            extra_acronyms: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExpansion {
    pub original_query: String,
    pub expanded_query: String,
    pub synonym_terms: Vec<String>,
    pub acronym_expansions: HashMap<String, String>,
    pub term_count: usize,
}

/// Appends acronym spellings and lexicon synonyms to a query. Running the
/// expander over its own output is a no-op.
pub struct QueryExpander {
    config: ExpansionConfig,
    acronyms: HashMap<String, String>,
    lexicon: Option<Arc<dyn SynonymLexicon>>,
}

impl QueryExpander {
    pub fn new(config: ExpansionConfig) -> Self {
        let mut acronyms: HashMap<String, String> = BUILTIN_ACRONYMS
            .iter()
            .map(|(acronym, phrase)| (acronym.to_string(), phrase.to_string()))
            .collect();
        for (acronym, phrase) in &config.extra_acronyms {
            acronyms.insert(acronym.to_lowercase(), phrase.clone());
        }
        Self {
            config,
            acronyms,
            lexicon: None,
        }
    }

    pub fn with_lexicon(mut self, lexicon: Arc<dyn SynonymLexicon>) -> Self {
        self.lexicon = Some(lexicon);
        self
    }

    pub fn expand(&self, query: &str) -> QueryExpansion {
        let original_query = query.trim().to_string();
        let mut expanded = original_query.clone();
        let mut acronym_expansions = HashMap::new();
        let mut synonym_terms = Vec::new();

        let tokens: Vec<String> = original_query
            .split_whitespace()
            .map(normalize_token)
            .filter(|token| !token.is_empty())
            .collect();

        for token in &tokens {
            if let Some(phrase) = self.acronyms.get(token) {
                if append_if_absent(&mut expanded, phrase) {
                    acronym_expansions.insert(token.clone(), phrase.clone());
                }
            }
        }

        if self.config.enable_synonyms {
            if let Some(lexicon) = &self.lexicon {
                for token in &tokens {
                    if STOPWORDS.contains(&token.as_str()) {
                        continue;
                    }
                    for synonym in lexicon.synonyms(token, self.config.max_expansions) {
                        if append_if_absent(&mut expanded, &synonym) {
                            synonym_terms.push(synonym);
                        }
                    }
                }
            }
        }

        let term_count = expanded.split_whitespace().count();
        QueryExpansion {
            original_query,
            expanded_query: expanded,
            synonym_terms,
            acronym_expansions,
            term_count,
        }
    }
}

fn normalize_token(token: &str) -> String {
    token
        .trim_matches(|ch: char| !ch.is_alphanumeric())
        .to_lowercase()
}

/// Appends `phrase` unless it already occurs; returns whether it was added.
fn append_if_absent(expanded: &mut String, phrase: &str) -> bool {
    if expanded.to_lowercase().contains(&phrase.to_lowercase()) {
        return false;
    }
    expanded.push(' ');
    expanded.push_str(phrase);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expander() -> QueryExpander {
        QueryExpander::new(ExpansionConfig::default())
    }

    #[test]
    fn acronyms_are_expanded_case_insensitively() {
        let expansion = expander().expand("ML pipelines");
        assert!(expansion.expanded_query.contains("machine learning"));
        assert_eq!(
            expansion.acronym_expansions.get("ml").map(String::as_str),
            Some("machine learning")
        );
    }

    #[test]
    fn caller_acronyms_extend_the_builtin_table() {
        let config = ExpansionConfig {
            extra_acronyms: HashMap::from([(
                "kb".to_string(),
                "knowledge base".to_string(),
            )]),
            ..ExpansionConfig::default()
        };
        let expansion = QueryExpander::new(config).expand("kb setup");
        assert!(expansion.expanded_query.contains("knowledge base"));
    }

    #[test]
    fn synonyms_come_from_the_lexicon_and_skip_stopwords() {
        let lexicon = StaticLexicon::from_entries([
            ("fast", vec!["quick", "rapid", "speedy"]),
            ("the", vec!["wrong"]),
        ]);
        let expansion = expander()
            .with_lexicon(Arc::new(lexicon))
            .expand("the fast index");

        // max_expansions caps the lookup at two synonyms.
        assert_eq!(expansion.synonym_terms, vec!["quick", "rapid"]);
        assert!(!expansion.expanded_query.contains("wrong"));
    }

    #[test]
    fn expansion_is_idempotent() {
        let lexicon = StaticLexicon::from_entries([("fast", vec!["quick"])]);
        let expander = expander().with_lexicon(Arc::new(lexicon));

        let first = expander.expand("fast ML search");
        let second = expander.expand(&first.expanded_query);
        assert_eq!(first.expanded_query, second.expanded_query);
    }

    #[test]
    fn term_count_reflects_expanded_query() {
        let expansion = expander().expand("api latency");
        assert_eq!(
            expansion.term_count,
            expansion.expanded_query.split_whitespace().count()
        );
        assert!(expansion.term_count > 2);
    }

    #[test]
    fn original_query_is_preserved() {
        let expansion = expander().expand("  GPU memory  ");
        assert_eq!(expansion.original_query, "GPU memory");
        assert!(expansion.expanded_query.starts_with("GPU memory"));
    }
}
