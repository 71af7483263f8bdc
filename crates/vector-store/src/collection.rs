/// Name of the collection holding one project's vectors for one model.
///
/// The provider and model are part of the name so that vectors from
/// different embedding spaces never share a collection.
#[must_use]
pub fn resolve_collection_name(prefix: &str, project_id: &str, provider: &str, model: &str) -> String {
    let project: String = project_id.chars().take(12).collect();
    format!(
        "{}_{}_{}_{}",
        slug(prefix),
        slug(&project),
        slug(provider),
        slug(model)
    )
}

fn slug(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect();
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "x".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn model_names_are_slugged() {
        assert_eq!(
            resolve_collection_name("gitvec", "0123456789abcdef", "ollama", "nomic-embed-text:v1.5"),
            "gitvec_0123456789ab_ollama_nomic_embed_text_v1_5"
        );
    }

    #[test]
    fn different_models_never_share_a_collection() {
        let a = resolve_collection_name("gitvec", "p", "hashing", "fnv-64");
        let b = resolve_collection_name("gitvec", "p", "hashing", "fnv-128");
        assert_ne!(a, b);
    }
}
