//! one-way normalization of raw Riot ids into the stored token form.
//! stripping is part of the on-disk format: tokens are built from the
//! cleaned names and never reverse-mapped.

/// strip one leading namespace prefix of the form `TFT_`, `TFT<N>_` or `Set<N>_`
fn strip_set_prefix(name: &str) -> &str {
    for prefix in ["TFT", "Set"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            if let Some(stripped) = rest[digits..].strip_prefix('_') {
                if !stripped.is_empty() {
                    return stripped;
                }
            }
        }
    }
    name
}

/// strip one leading `TFT_Item_` or `TFT<N>_Item_` prefix
fn strip_item_prefix(name: &str) -> &str {
    if let Some(rest) = name.strip_prefix("TFT") {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if let Some(stripped) = rest[digits..].strip_prefix("_Item_") {
            if !stripped.is_empty() {
                return stripped;
            }
        }
    }
    name
}

pub fn clean_unit(name: &str) -> String {
    strip_set_prefix(name).to_string()
}

pub fn clean_item(name: &str) -> String {
    let stripped = strip_item_prefix(name);
    if stripped.len() != name.len() {
        stripped.to_string()
    } else {
        strip_set_prefix(name).to_string()
    }
}

pub fn clean_trait(name: &str) -> String {
    strip_set_prefix(name).to_string()
}

/// lowercase the cleaned id for case-insensitive catalog lookups
pub fn catalog_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_prefixes() {
        assert_eq!(clean_unit("TFT16_Ashe"), "Ashe");
        assert_eq!(clean_unit("TFT_Ashe"), "Ashe");
        assert_eq!(clean_unit("Set16_Ashe"), "Ashe");
        assert_eq!(clean_unit("Ashe"), "Ashe");
    }

    #[test]
    fn item_prefixes() {
        assert_eq!(clean_item("TFT_Item_InfinityEdge"), "InfinityEdge");
        assert_eq!(clean_item("TFT16_Item_InfinityEdge"), "InfinityEdge");
        assert_eq!(clean_item("InfinityEdge"), "InfinityEdge");
    }

    #[test]
    fn stripping_is_single_shot() {
        // only one namespace layer is removed; inner underscores survive
        assert_eq!(clean_item("Bilgewater_CaptainsBrew"), "Bilgewater_CaptainsBrew");
    }
}
