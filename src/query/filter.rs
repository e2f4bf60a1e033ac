/// a parsed include/exclude token filter. tokens arrive as one
/// comma-separated list; a `-` or `!` prefix marks an exclusion.
/// ordering is semantically irrelevant, so cache keys use canonical
/// (sorted) forms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Filter {
    pub fn parse(csv: &str) -> Self {
        let mut filter = Self::default();
        for raw in csv.split(',') {
            let token = raw.trim();
            if token.is_empty() {
                continue;
            }
            if let Some(stripped) = token
                .strip_prefix('-')
                .or_else(|| token.strip_prefix('!'))
            {
                let stripped = stripped.trim_start_matches(['-', '!']);
                if !stripped.is_empty() {
                    filter.exclude.push(stripped.to_string());
                }
            } else {
                filter.include.push(token.to_string());
            }
        }
        filter
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// sorted, deduplicated include/exclude tuples for cache keys
    pub fn canonical(&self) -> (Vec<String>, Vec<String>) {
        let mut include = self.include.clone();
        let mut exclude = self.exclude.clone();
        include.sort();
        include.dedup();
        exclude.sort();
        exclude.dedup();
        (include, exclude)
    }

    /// the original token list, exclusions re-prefixed, for echoing back
    pub fn tokens(&self) -> Vec<String> {
        self.include
            .iter()
            .cloned()
            .chain(self.exclude.iter().map(|t| format!("-{}", t)))
            .collect()
    }

    /// every mentioned token, for candidate suppression
    pub fn mentioned(&self) -> impl Iterator<Item = &str> {
        self.include
            .iter()
            .chain(self.exclude.iter())
            .map(|s| s.as_str())
    }
}

impl From<&str> for Filter {
    fn from(csv: &str) -> Self {
        Self::parse(csv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_prefix() {
        let filter = Filter::parse("U:Ashe, -T:Demacia ,!I:InfinityEdge,,U:Briar");
        assert_eq!(filter.include, vec!["U:Ashe", "U:Briar"]);
        assert_eq!(filter.exclude, vec!["T:Demacia", "I:InfinityEdge"]);
    }

    #[test]
    fn canonical_sorts_and_dedups() {
        let filter = Filter::parse("U:B,U:A,U:B,-T:Z,-T:A");
        let (include, exclude) = filter.canonical();
        assert_eq!(include, vec!["U:A", "U:B"]);
        assert_eq!(exclude, vec!["T:A", "T:Z"]);
    }

    #[test]
    fn bare_prefix_is_dropped() {
        let filter = Filter::parse("-,!,U:Ashe");
        assert_eq!(filter.include, vec!["U:Ashe"]);
        assert!(filter.exclude.is_empty());
    }
}
