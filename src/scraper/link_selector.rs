//! Heuristic link scoring (§4.5 stage 3). Portuguese-only keyword lists,
//! matching the original's lack of any language detection — this crate
//! makes the same call rather than inventing localization the source
//! never had.

const HIGH_VALUE_KEYWORDS: &[(&str, i32)] = &[
    ("sobre", 10),
    ("quem-somos", 10),
    ("sobre-nos", 10),
    ("empresa", 8),
    ("institucional", 8),
    ("contato", 9),
    ("fale-conosco", 9),
    ("produtos", 7),
    ("servicos", 7),
    ("solucoes", 6),
];

const LOW_VALUE_KEYWORDS: &[(&str, i32)] = &[
    ("blog", -5),
    ("noticias", -4),
    ("login", -8),
    ("carrinho", -8),
    ("politica-de-privacidade", -6),
    ("termos-de-uso", -6),
    ("trabalhe-conosco", -3),
];

/// Score one link path for how likely it is to contain profile-relevant
/// content, higher is better.
pub fn score_link(url: &str) -> i32 {
    let normalized = url.to_lowercase().replace(['_', ' '], "-");
    let mut score = 0;

    for (keyword, weight) in HIGH_VALUE_KEYWORDS {
        if normalized.contains(keyword) {
            score += weight;
        }
    }
    for (keyword, weight) in LOW_VALUE_KEYWORDS {
        if normalized.contains(keyword) {
            score += weight;
        }
    }

    // Prefer shallow paths: /sobre is more likely to be the About page
    // than /blog/2019/05/sobre-a-empresa.
    let depth = normalized.trim_matches('/').matches('/').count() as i32;
    score -= depth;

    score
}

/// Rank candidate links and return up to `limit` URLs, highest score
/// first, breaking ties by original discovery order (stable sort).
pub fn select_top_links(candidates: &[String], limit: usize) -> Vec<String> {
    let mut scored: Vec<(i32, usize, &String)> = candidates
        .iter()
        .enumerate()
        .map(|(i, url)| (score_link(url), i, url))
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    scored.into_iter().take(limit).map(|(_, _, url)| url.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn about_page_scores_higher_than_blog() {
        assert!(score_link("https://acme.com/sobre") > score_link("https://acme.com/blog"));
    }

    #[test]
    fn login_page_scores_negative() {
        assert!(score_link("https://acme.com/login") < 0);
    }

    #[test]
    fn select_top_links_respects_limit_and_order() {
        let candidates = vec![
            "https://acme.com/blog".to_string(),
            "https://acme.com/sobre".to_string(),
            "https://acme.com/contato".to_string(),
            "https://acme.com/login".to_string(),
        ];
        let top = select_top_links(&candidates, 2);
        assert_eq!(top.len(), 2);
        assert!(top.contains(&"https://acme.com/sobre".to_string()));
        assert!(top.contains(&"https://acme.com/contato".to_string()));
    }
}
