use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct TransactionCategory {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub keywords: serde_json::Value,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub position: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionCategory {
    /// Keywords as lowercase strings; non-string JSON entries are ignored.
    pub fn keyword_list(&self) -> Vec<String> {
        self.keywords
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|k| k.as_str())
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A category with its children, as returned by `GET /categories`.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryNode {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub keywords: Vec<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub subcategories: Vec<CategoryNode>,
}

impl CategoryNode {
    /// Assemble the two-level tree from flat rows, ordered by `position`.
    /// Rows whose parent is missing are promoted to the top level.
    pub fn build_tree(categories: &[TransactionCategory]) -> Vec<CategoryNode> {
        let mut sorted: Vec<&TransactionCategory> = categories.iter().collect();
        sorted.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.name.cmp(&b.name)));

        let known: std::collections::HashSet<Uuid> = sorted.iter().map(|c| c.id).collect();
        let is_root = |c: &TransactionCategory| c.parent_id.is_none_or(|p| !known.contains(&p));

        sorted
            .iter()
            .filter(|c| is_root(c))
            .map(|root| {
                let mut node = CategoryNode::leaf(root);
                node.subcategories = sorted
                    .iter()
                    .filter(|c| c.parent_id == Some(root.id))
                    .map(|c| CategoryNode::leaf(c))
                    .collect();
                node
            })
            .collect()
    }

    fn leaf(c: &TransactionCategory) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            parent_id: c.parent_id,
            keywords: c.keyword_list(),
            color: c.color.clone(),
            icon: c.icon.clone(),
            subcategories: Vec::new(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::json;

    pub fn category(
        name: &str,
        parent_id: Option<Uuid>,
        keywords: &[&str],
        position: i32,
    ) -> TransactionCategory {
        TransactionCategory {
            id: Uuid::new_v4(),
            name: name.to_string(),
            parent_id,
            keywords: json!(keywords),
            color: None,
            icon: None,
            position,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::category;
    use super::*;

    #[test]
    fn builds_two_level_tree_in_position_order() {
        let food = category("Food & Dining", None, &["food"], 2);
        let income = category("Income", None, &["salary"], 1);
        let coffee = category("Coffee Shops", Some(food.id), &["Coffee", "cafe"], 3);

        let tree = CategoryNode::build_tree(&[food.clone(), coffee, income]);

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].name, "Income");
        assert_eq!(tree[1].name, "Food & Dining");
        assert_eq!(tree[1].subcategories.len(), 1);
        assert_eq!(tree[1].subcategories[0].keywords, vec!["coffee", "cafe"]);
    }

    #[test]
    fn orphaned_children_become_roots() {
        let orphan = category("Parking", Some(Uuid::new_v4()), &["parking"], 1);
        let tree = CategoryNode::build_tree(&[orphan]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name, "Parking");
    }
}
