//! Filtering and facet helpers over a restaurant list.

use super::Restaurant;

/// Filter value meaning "no filter" for cuisine and neighborhood selects.
pub const ALL: &str = "all";

/// Filter by cuisine and neighborhood; `"all"` disables either filter.
pub fn by_cuisine_and_neighborhood<'a>(
    restaurants: &'a [Restaurant],
    cuisine: &str,
    neighborhood: &str,
) -> Vec<&'a Restaurant> {
    restaurants
        .iter()
        .filter(|r| cuisine == ALL || r.cuisine_type.as_deref() == Some(cuisine))
        .filter(|r| neighborhood == ALL || r.neighborhood.as_deref() == Some(neighborhood))
        .collect()
}

/// Unique neighborhoods in first-seen order.
pub fn neighborhoods(restaurants: &[Restaurant]) -> Vec<String> {
    unique(restaurants.iter().filter_map(|r| r.neighborhood.as_deref()))
}

/// Unique cuisines in first-seen order.
pub fn cuisines(restaurants: &[Restaurant]) -> Vec<String> {
    unique(restaurants.iter().filter_map(|r| r.cuisine_type.as_deref()))
}

fn unique<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for value in values {
        if !seen.iter().any(|s| s == value) {
            seen.push(value.to_string());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn restaurant(id: i64, neighborhood: &str, cuisine: &str) -> Restaurant {
        Restaurant {
            id,
            name: format!("Restaurant {}", id),
            neighborhood: Some(neighborhood.to_string()),
            cuisine_type: Some(cuisine.to_string()),
            is_favorite: false,
            extra: Map::new(),
        }
    }

    fn sample() -> Vec<Restaurant> {
        vec![
            restaurant(1, "Manhattan", "Asian"),
            restaurant(2, "Brooklyn", "Pizza"),
            restaurant(3, "Manhattan", "Pizza"),
            restaurant(4, "Queens", "Asian"),
        ]
    }

    #[test]
    fn test_filters() {
        let list = sample();
        let ids = |v: Vec<&Restaurant>| v.iter().map(|r| r.id).collect::<Vec<_>>();

        assert_eq!(ids(by_cuisine_and_neighborhood(&list, "Pizza", ALL)), vec![2, 3]);
        assert_eq!(ids(by_cuisine_and_neighborhood(&list, "Thai", ALL)), Vec::<i64>::new());
        assert_eq!(ids(by_cuisine_and_neighborhood(&list, "Pizza", "Manhattan")), vec![3]);
        assert_eq!(ids(by_cuisine_and_neighborhood(&list, ALL, "Manhattan")), vec![1, 3]);
        assert_eq!(ids(by_cuisine_and_neighborhood(&list, ALL, ALL)), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_facets_are_unique_in_first_seen_order() {
        let list = sample();
        assert_eq!(neighborhoods(&list), vec!["Manhattan", "Brooklyn", "Queens"]);
        assert_eq!(cuisines(&list), vec!["Asian", "Pizza"]);
    }
}
