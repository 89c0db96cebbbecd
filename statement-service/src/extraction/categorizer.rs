use crate::models::TransactionCategory;
use serde::Serialize;
use std::cmp::Ordering;
use uuid::Uuid;

pub const UNCATEGORIZED: &str = "Uncategorized";

/// Outcome of categorizing one description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryMatch {
    /// Top-level category name.
    pub category: String,
    pub subcategory: Option<String>,
    /// Most specific category that matched.
    pub category_id: Option<Uuid>,
    pub matched_keyword: Option<String>,
}

impl CategoryMatch {
    fn uncategorized() -> Self {
        Self {
            category: UNCATEGORIZED.to_string(),
            subcategory: None,
            category_id: None,
            matched_keyword: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    id: Uuid,
    name: String,
    parent: Option<usize>,
    position: i32,
    keywords: Vec<String>,
}

/// Keyword-substring categorizer over the two-level category tree.
///
/// Every keyword of every category is tested as a case-insensitive
/// substring of the description. The longest matching keyword wins; ties go
/// to a subcategory over a top-level category, then to the lower position.
#[derive(Debug, Clone, Default)]
pub struct Categorizer {
    entries: Vec<Entry>,
}

impl Categorizer {
    pub fn new(categories: &[TransactionCategory]) -> Self {
        let index_of = |id: Uuid| categories.iter().position(|c| c.id == id);

        let entries = categories
            .iter()
            .map(|c| Entry {
                id: c.id,
                name: c.name.clone(),
                parent: c.parent_id.and_then(index_of),
                position: c.position,
                keywords: c.keyword_list(),
            })
            .collect();

        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn categorize(&self, description: &str) -> CategoryMatch {
        let haystack = description.to_lowercase();

        let best = self
            .entries
            .iter()
            .enumerate()
            .flat_map(|(idx, entry)| {
                entry
                    .keywords
                    .iter()
                    .filter(|k| haystack.contains(k.as_str()))
                    .map(move |k| (idx, k))
            })
            .max_by(|(a_idx, a_kw), (b_idx, b_kw)| self.rank(*a_idx, a_kw, *b_idx, b_kw));

        let Some((idx, keyword)) = best else {
            return CategoryMatch::uncategorized();
        };

        let entry = &self.entries[idx];
        let (category, subcategory) = match entry.parent.map(|p| &self.entries[p]) {
            Some(parent) => (parent.name.clone(), Some(entry.name.clone())),
            None => (entry.name.clone(), None),
        };

        CategoryMatch {
            category,
            subcategory,
            category_id: Some(entry.id),
            matched_keyword: Some(keyword.clone()),
        }
    }

    /// Ordering where the preferred candidate compares greater.
    fn rank(&self, a_idx: usize, a_kw: &str, b_idx: usize, b_kw: &str) -> Ordering {
        let (a, b) = (&self.entries[a_idx], &self.entries[b_idx]);
        a_kw.chars()
            .count()
            .cmp(&b_kw.chars().count())
            .then_with(|| a.parent.is_some().cmp(&b.parent.is_some()))
            .then_with(|| b.position.cmp(&a.position))
            .then_with(|| b_idx.cmp(&a_idx))
    }
}
