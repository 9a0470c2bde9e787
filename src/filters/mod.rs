use crate::route_catalog::{Category, RouteCatalog, RouteEntry};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Filter key -> enabled. Produced by the UI, read by the projector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    keys: AHashMap<String, bool>,
}

impl FilterState {
    /// Rail lines and rail categories on, buses off.
    pub fn initial() -> Self {
        let mut keys = AHashMap::new();

        for category in Category::ALL {
            let enabled = category != Category::Bus;

            keys.insert(category.key().to_string(), enabled);

            for member in category.member_keys() {
                keys.insert(member.to_string(), enabled);
            }
        }

        Self { keys }
    }

    /// Missing keys read as enabled.
    pub fn is_enabled(&self, key: &str) -> bool {
        self.keys.get(key).copied().unwrap_or(true)
    }

    pub fn set(&mut self, key: &str, enabled: bool) {
        self.keys.insert(key.to_string(), enabled);
    }

    /// Flips the aggregate and sets every member to the aggregate's new value.
    pub fn toggle_category(&mut self, category: Category) {
        let enabled = !self.is_enabled(category.key());

        self.set(category.key(), enabled);

        for member in category.member_keys() {
            self.set(member, enabled);
        }
    }

    /// Flips one line or bus group. The aggregate key is left alone.
    pub fn toggle_line(&mut self, key: &str) {
        let enabled = !self.is_enabled(key);
        self.set(key, enabled);
    }

    pub fn show_all(&mut self) {
        for value in self.keys.values_mut() {
            *value = true;
        }
    }

    /// Whether every member of the category is off, used to dim the category button.
    pub fn is_category_off(&self, category: Category) -> bool {
        category
            .member_keys()
            .iter()
            .all(|member| !self.is_enabled(member))
    }

    /// Rail routes need their line key. Buses need both their group and the `bus` aggregate.
    pub fn is_route_visible(&self, route: &RouteEntry) -> bool {
        let own_key = self.is_enabled(&route.filter_key);

        if route.is_bus() {
            own_key && self.is_enabled(Category::Bus.key())
        } else {
            own_key
        }
    }

    /// Routes missing from the catalog fall back to their raw id as the key.
    pub fn is_route_id_visible(&self, catalog: &RouteCatalog, route_id: &str) -> bool {
        match catalog.get(route_id) {
            Some(route) => self.is_route_visible(route),
            None => self.is_enabled(route_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route_catalog::RouteCatalog;

    #[test]
    fn initial_state_hides_buses() {
        let filters = FilterState::initial();

        assert!(filters.is_enabled("subway"));
        assert!(filters.is_enabled("Red"));
        assert!(filters.is_enabled("CR-Lowell"));
        assert!(!filters.is_enabled("bus"));
        assert!(!filters.is_enabled("Yellow"));
        assert!(!filters.is_enabled("Silver"));
        assert!(filters.is_enabled("never-seen"));
    }

    #[test]
    fn category_toggle_cascades_to_members() {
        let mut filters = FilterState::initial();

        filters.toggle_category(Category::Subway);

        assert!(!filters.is_enabled("subway"));
        for line in Category::Subway.member_keys() {
            assert!(!filters.is_enabled(line));
        }
        assert!(filters.is_category_off(Category::Subway));
        assert!(filters.is_enabled("Green-B"));

        filters.toggle_category(Category::Subway);
        assert!(filters.is_enabled("Blue"));
    }

    #[test]
    fn line_toggle_leaves_aggregate_alone() {
        let mut filters = FilterState::initial();

        filters.toggle_line("Orange");

        assert!(!filters.is_enabled("Orange"));
        assert!(filters.is_enabled("subway"));
        assert!(!filters.is_category_off(Category::Subway));
    }

    #[test]
    fn bus_aggregate_gates_groups() {
        let catalog = RouteCatalog::mbta().unwrap();
        let mut filters = FilterState::initial();
        let yellow = catalog.get("28").unwrap();

        filters.toggle_category(Category::Bus);
        assert!(filters.is_route_visible(yellow));

        filters.set("bus", false);
        assert!(filters.is_enabled("Yellow"));
        assert!(!filters.is_route_visible(yellow));

        let red = catalog.get("Red").unwrap();
        assert!(filters.is_route_visible(red));
    }

    #[test]
    fn show_all_enables_everything() {
        let mut filters = FilterState::initial();
        filters.toggle_line("Red");

        filters.show_all();

        assert!(filters.is_enabled("Red"));
        assert!(filters.is_enabled("bus"));
        assert!(filters.is_enabled("Silver"));
    }
}
