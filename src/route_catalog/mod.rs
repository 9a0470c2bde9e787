use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Subway,
    LightRail,
    CommuterRail,
    Bus,
}

impl Mode {
    /// GTFS route_type, used for the `filter[route_type]` query on the vehicle stream.
    pub fn route_type(&self) -> u8 {
        match self {
            Mode::LightRail => 0,
            Mode::Subway => 1,
            Mode::CommuterRail => 2,
            Mode::Bus => 3,
        }
    }
}

/// The aggregate filter keys the UI exposes as top level toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Subway,
    LightRail,
    Commuter,
    Bus,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Subway,
        Category::LightRail,
        Category::Commuter,
        Category::Bus,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Category::Subway => "subway",
            Category::LightRail => "lightrail",
            Category::Commuter => "commuter",
            Category::Bus => "bus",
        }
    }

    pub fn from_key(key: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.key() == key)
    }

    /// Filter keys toggled together with this category.
    pub fn member_keys(&self) -> &'static [&'static str] {
        match self {
            Category::Subway => SUBWAY_LINES,
            Category::LightRail => LIGHTRAIL_LINES,
            Category::Commuter => COMMUTER_LINES,
            Category::Bus => BUS_GROUPS,
        }
    }
}

pub const SUBWAY_LINES: &[&str] = &["Red", "Orange", "Blue"];

pub const LIGHTRAIL_LINES: &[&str] = &["Mattapan", "Green-B", "Green-C", "Green-D", "Green-E"];

pub const COMMUTER_LINES: &[&str] = &[
    "CR-Fairmount",
    "CR-Fitchburg",
    "CR-Worcester",
    "CR-Franklin",
    "CR-Greenbush",
    "CR-Haverhill",
    "CR-Kingston",
    "CR-Lowell",
    "CR-Middleborough",
    "CR-Needham",
    "CR-Newburyport",
    "CR-Providence",
    "CR-Foxboro",
    "CR-NewBedford",
];

pub const BUS_GROUPS: &[&str] = &["Yellow", "Silver"];

const SILVER_LINE_ROUTES: &[(&str, &str)] = &[
    ("741", "SL1"),
    ("742", "SL2"),
    ("743", "SL3"),
    ("746", "SL4"),
    ("749", "SL5"),
    ("751", "SLW"),
];

const FREQUENT_BUS_ROUTES: &[&str] = &[
    "1", "15", "22", "23", "28", "32", "39", "57", "66", "71", "73", "77", "104", "109", "110",
    "111", "116",
];

const RAIL_LINE_WIDTH: f64 = 4.0;
const SILVER_LINE_WIDTH: f64 = 2.0;
const YELLOW_BUS_LINE_WIDTH: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub route_id: String,
    pub mode: Mode,
    pub category: Category,
    /// Line name for rail, `Yellow`/`Silver` for buses.
    pub filter_key: String,
    pub display_name: String,
    pub line_width: f64,
}

impl RouteEntry {
    pub fn is_bus(&self) -> bool {
        self.mode == Mode::Bus
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("route {0} listed more than once")]
    DuplicateRoute(String),
    #[error("filter key {key} of category {category:?} has no routes")]
    EmptyFilterKey { category: Category, key: String },
    #[error("route {route_id} uses filter key {key} which is not a member of {category:?}")]
    UnknownFilterKey {
        route_id: String,
        category: Category,
        key: String,
    },
}

/// Static route id to category table. Built once at startup.
#[derive(Debug, Clone)]
pub struct RouteCatalog {
    entries: Vec<RouteEntry>,
    by_route_id: AHashMap<String, usize>,
}

impl RouteCatalog {
    pub fn new(entries: Vec<RouteEntry>) -> Result<Self, CatalogError> {
        let mut by_route_id = AHashMap::with_capacity(entries.len());

        for (i, entry) in entries.iter().enumerate() {
            if by_route_id.insert(entry.route_id.clone(), i).is_some() {
                return Err(CatalogError::DuplicateRoute(entry.route_id.clone()));
            }

            if !entry
                .category
                .member_keys()
                .contains(&entry.filter_key.as_str())
            {
                return Err(CatalogError::UnknownFilterKey {
                    route_id: entry.route_id.clone(),
                    category: entry.category,
                    key: entry.filter_key.clone(),
                });
            }
        }

        let covered_keys: AHashSet<(Category, &str)> = entries
            .iter()
            .map(|e| (e.category, e.filter_key.as_str()))
            .collect();

        let used_categories: AHashSet<Category> = entries.iter().map(|e| e.category).collect();

        for category in used_categories {
            for key in category.member_keys() {
                if !covered_keys.contains(&(category, *key)) {
                    return Err(CatalogError::EmptyFilterKey {
                        category,
                        key: key.to_string(),
                    });
                }
            }
        }

        Ok(Self {
            entries,
            by_route_id,
        })
    }

    /// The MBTA rapid transit, commuter rail and frequent bus network.
    pub fn mbta() -> Result<Self, CatalogError> {
        let mut entries = Vec::new();

        let rail = [
            (Mode::Subway, Category::Subway, SUBWAY_LINES),
            (Mode::LightRail, Category::LightRail, LIGHTRAIL_LINES),
            (Mode::CommuterRail, Category::Commuter, COMMUTER_LINES),
        ];

        for (mode, category, lines) in rail {
            for line in lines {
                entries.push(RouteEntry {
                    route_id: line.to_string(),
                    mode,
                    category,
                    filter_key: line.to_string(),
                    display_name: line.to_string(),
                    line_width: RAIL_LINE_WIDTH,
                });
            }
        }

        for (route_id, display_name) in SILVER_LINE_ROUTES {
            entries.push(RouteEntry {
                route_id: route_id.to_string(),
                mode: Mode::Bus,
                category: Category::Bus,
                filter_key: String::from("Silver"),
                display_name: display_name.to_string(),
                line_width: SILVER_LINE_WIDTH,
            });
        }

        for route_id in FREQUENT_BUS_ROUTES {
            entries.push(RouteEntry {
                route_id: route_id.to_string(),
                mode: Mode::Bus,
                category: Category::Bus,
                filter_key: String::from("Yellow"),
                display_name: route_id.to_string(),
                line_width: YELLOW_BUS_LINE_WIDTH,
            });
        }

        Self::new(entries)
    }

    pub fn get(&self, route_id: &str) -> Option<&RouteEntry> {
        self.by_route_id.get(route_id).map(|i| &self.entries[*i])
    }

    pub fn contains(&self, route_id: &str) -> bool {
        self.by_route_id.contains_key(route_id)
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn route_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.route_id.as_str())
    }

    /// Distinct GTFS route types of all tracked routes, ascending.
    pub fn route_types(&self) -> Vec<u8> {
        let mut types: Vec<u8> = self.entries.iter().map(|e| e.mode.route_type()).collect();
        types.sort_unstable();
        types.dedup();
        types
    }

    pub fn display_name<'a>(&'a self, route_id: &'a str) -> &'a str {
        self.get(route_id)
            .map(|e| e.display_name.as_str())
            .unwrap_or(route_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mbta_catalog_validates() {
        let catalog = RouteCatalog::mbta().unwrap();

        assert_eq!(catalog.entries().len(), 3 + 5 + 14 + 6 + 17);
        assert!(catalog.contains("Green-E"));
        assert!(catalog.contains("742"));
        assert!(!catalog.contains("Green"));
        assert_eq!(catalog.display_name("742"), "SL2");
        assert_eq!(catalog.display_name("not-tracked"), "not-tracked");
        assert_eq!(catalog.route_types(), vec![0, 1, 2, 3]);

        let yellow = catalog.get("111").unwrap();
        assert!(yellow.is_bus());
        assert_eq!(yellow.filter_key, "Yellow");
        assert_eq!(yellow.line_width, 0.5);
    }

    #[test]
    fn duplicate_routes_are_rejected() {
        let entry = RouteEntry {
            route_id: String::from("Red"),
            mode: Mode::Subway,
            category: Category::Subway,
            filter_key: String::from("Red"),
            display_name: String::from("Red"),
            line_width: 4.0,
        };

        let err = RouteCatalog::new(vec![entry.clone(), entry]).unwrap_err();
        assert_eq!(err, CatalogError::DuplicateRoute(String::from("Red")));
    }

    #[test]
    fn incomplete_category_is_rejected() {
        let entry = RouteEntry {
            route_id: String::from("741"),
            mode: Mode::Bus,
            category: Category::Bus,
            filter_key: String::from("Silver"),
            display_name: String::from("SL1"),
            line_width: 2.0,
        };

        let err = RouteCatalog::new(vec![entry]).unwrap_err();
        assert_eq!(
            err,
            CatalogError::EmptyFilterKey {
                category: Category::Bus,
                key: String::from("Yellow"),
            }
        );
    }

    #[test]
    fn filter_key_outside_category_is_rejected() {
        let entry = RouteEntry {
            route_id: String::from("Red"),
            mode: Mode::Subway,
            category: Category::Subway,
            filter_key: String::from("Yellow"),
            display_name: String::from("Red"),
            line_width: 4.0,
        };

        assert!(matches!(
            RouteCatalog::new(vec![entry]),
            Err(CatalogError::UnknownFilterKey { .. })
        ));
    }
}
