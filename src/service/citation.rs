//! Links generated claims to the evidence snippets that support them

use std::collections::BTreeSet;

use super::dedup::semantic_similarity;

/// Best-scoring snippet accepted for one claim
#[derive(Debug, Clone, PartialEq)]
pub struct CitationLink<Id> {
    pub claim: String,
    pub snippet_id: Id,
    pub score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CitationLinker {
    min_score: f64,
}

impl CitationLinker {
    pub fn new(min_score: f64) -> Self {
        Self { min_score }
    }

    /// For every claim keep the single best snippet, first-seen on ties, and
    /// accept it only when it reaches the minimum score
    pub fn link<'a, Id, I>(&self, claims: &[String], snippets: I) -> Vec<CitationLink<Id>>
    where
        Id: Clone + 'a,
        I: IntoIterator<Item = (&'a Id, &'a str)> + Clone,
    {
        let mut links = Vec::new();

        for claim in claims {
            let mut best: Option<(&Id, f64)> = None;
            for (id, text) in snippets.clone() {
                let score = semantic_similarity(claim, text);
                if best.is_none_or(|(_, top)| score > top) {
                    best = Some((id, score));
                }
            }

            match best {
                Some((id, score)) if score >= self.min_score => {
                    tracing::debug!(score = score, "Claim linked to evidence");
                    links.push(CitationLink {
                        claim: claim.clone(),
                        snippet_id: id.clone(),
                        score,
                    });
                }
                _ => {
                    tracing::debug!(claim_length = claim.len(), "Claim left without citation");
                }
            }
        }

        links
    }

    /// Distinct snippet ids that satisfied the threshold, in sorted order
    pub fn cited_ids<'a, Id, I>(&self, claims: &[String], snippets: I) -> Vec<Id>
    where
        Id: Clone + Ord + 'a,
        I: IntoIterator<Item = (&'a Id, &'a str)> + Clone,
    {
        self.link(claims, snippets)
            .into_iter()
            .map(|link| link.snippet_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl Default for CitationLinker {
    fn default() -> Self {
        Self::new(0.15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippets(pairs: &[(&'static str, &'static str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(id, text)| (id.to_string(), text.to_string()))
            .collect()
    }

    fn view(snippets: &[(String, String)]) -> impl Iterator<Item = (&String, &str)> + Clone {
        snippets.iter().map(|(id, text)| (id, text.as_str()))
    }

    #[test]
    fn test_links_claim_to_matching_snippet_only() {
        let claims = vec!["Ransomware activity increased in healthcare providers".to_string()];
        let snippets = snippets(&[
            ("1", "Healthcare providers reported increased ransomware activity this month."),
            ("2", "Unrelated geopolitical commentary."),
        ]);

        let links = CitationLinker::default().link(&claims, view(&snippets));

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].snippet_id, "1");
        assert!((links[0].score - 0.625).abs() < 1e-12);
    }

    #[test]
    fn test_ties_keep_first_seen_snippet() {
        let claims = vec!["phishing wave".to_string()];
        let snippets = snippets(&[("b", "phishing wave"), ("a", "phishing wave")]);

        let links = CitationLinker::default().link(&claims, view(&snippets));

        assert_eq!(links[0].snippet_id, "b");
    }

    #[test]
    fn test_below_threshold_is_dropped() {
        let claims = vec!["Supply chain compromise of build servers observed".to_string()];
        let snippets = snippets(&[("1", "Build pipelines were fine this quarter and nothing else happened at all")]);

        let links = CitationLinker::new(0.5).link(&claims, view(&snippets));

        assert!(links.is_empty());
    }

    #[test]
    fn test_cited_ids_are_distinct_and_sorted() {
        let claims = vec![
            "Credential phishing targets finance staff".to_string(),
            "Finance staff hit by credential phishing".to_string(),
            "Lateral movement followed the intrusion".to_string(),
        ];
        let snippets = snippets(&[
            ("z", "Lateral movement followed the initial intrusion"),
            ("m", "Credential phishing targets finance staff across regions"),
        ]);

        let ids = CitationLinker::default().cited_ids(&claims, view(&snippets));

        assert_eq!(ids, vec!["m".to_string(), "z".to_string()]);
    }

    #[test]
    fn test_no_snippets_yields_no_links() {
        let claims = vec!["Anything at all".to_string()];
        let empty: Vec<(String, String)> = Vec::new();
        assert!(CitationLinker::default().link(&claims, view(&empty)).is_empty());
    }
}
