use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Road distances in kilometres between supported cities.
const STANDARD_ROUTES: &[(&str, &str, f64)] = &[
    ("москва", "санкт-петербург", 635.0),
    ("москва", "екатеринбург", 1416.0),
    ("москва", "новосибирск", 3354.0),
    ("москва", "красноярск", 4205.0),
    ("москва", "иркутск", 5152.0),
    ("москва", "владивосток", 9100.0),
    ("москва", "ростов-на-дону", 1070.0),
    ("москва", "сочи", 1360.0),
    ("москва", "казань", 820.0),
    ("москва", "нижний новгород", 420.0),
    ("москва", "самара", 1050.0),
    ("москва", "волгоград", 970.0),
    ("москва", "воронеж", 520.0),
    ("москва", "саратов", 850.0),
    ("москва", "пермь", 1380.0),
    ("москва", "уфа", 1160.0),
    ("москва", "челябинск", 1510.0),
    ("москва", "омск", 2550.0),
    ("москва", "тюмень", 1720.0),
    ("санкт-петербург", "екатеринбург", 1780.0),
    ("санкт-петербург", "новосибирск", 3720.0),
    ("санкт-петербург", "калининград", 550.0),
    ("санкт-петербург", "мурманск", 1050.0),
    ("санкт-петербург", "архангельск", 1130.0),
    ("санкт-петербург", "петрозаводск", 320.0),
    ("санкт-петербург", "великий новгород", 180.0),
    ("екатеринбург", "новосибирск", 1940.0),
    ("екатеринбург", "челябинск", 200.0),
    ("екатеринбург", "пермь", 360.0),
    ("екатеринбург", "тюмень", 320.0),
    ("екатеринбург", "уфа", 520.0),
    ("новосибирск", "омск", 650.0),
    ("новосибирск", "красноярск", 850.0),
    ("новосибирск", "томск", 270.0),
    ("новосибирск", "барнаул", 230.0),
];

const STANDARD_ALIASES: &[(&str, &str)] = &[("спб", "санкт-петербург")];

static STANDARD_TABLE: OnceLock<Arc<DistanceTable>> = OnceLock::new();

/// Immutable symmetric city-pair distance lookup.
///
/// Keys are stored with the two normalized city names in sorted order, so
/// `distance(a, b)` and `distance(b, a)` always hit the same entry.
#[derive(Clone, Debug, Default)]
pub struct DistanceTable {
    distances: HashMap<(String, String), f64>,
    aliases: HashMap<String, String>,
}

impl DistanceTable {
    pub fn new<'a>(
        routes: impl IntoIterator<Item = (&'a str, &'a str, f64)>,
        aliases: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut table = Self {
            distances: HashMap::new(),
            aliases: aliases
                .into_iter()
                .map(|(alias, city)| (fold_case(alias), fold_case(city)))
                .collect(),
        };
        for (from, to, km) in routes {
            let key = table.key(from, to);
            table.distances.insert(key, km);
        }
        table
    }

    /// Shared instance of the built-in table, built on first use.
    pub fn standard() -> Arc<Self> {
        STANDARD_TABLE
            .get_or_init(|| {
                Arc::new(Self::new(STANDARD_ROUTES.iter().copied(), STANDARD_ALIASES.iter().copied()))
            })
            .clone()
    }

    /// Trims, lowercases and resolves aliases.
    pub fn normalize(&self, city: &str) -> String {
        let folded = fold_case(city);
        self.aliases.get(&folded).cloned().unwrap_or(folded)
    }

    /// Known distance between two cities; `Some(0.0)` for the same city and
    /// `None` for pairs the table does not list.
    pub fn lookup(&self, from: &str, to: &str) -> Option<f64> {
        let (from, to) = (self.normalize(from), self.normalize(to));
        if from == to {
            return Some(0.0);
        }
        self.distances.get(&ordered(from, to)).copied()
    }

    pub fn distance_or(&self, from: &str, to: &str, default_km: f64) -> f64 {
        self.lookup(from, to).unwrap_or(default_km)
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    pub fn routes(&self) -> impl Iterator<Item = (&str, &str, f64)> + '_ {
        self.distances.iter().map(|((from, to), km)| (from.as_str(), to.as_str(), *km))
    }

    fn key(&self, from: &str, to: &str) -> (String, String) {
        ordered(self.normalize(from), self.normalize(to))
    }
}

fn fold_case(city: &str) -> String {
    city.trim().to_lowercase()
}

fn ordered(a: String, b: String) -> (String, String) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
