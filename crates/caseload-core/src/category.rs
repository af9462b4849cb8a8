//! Clinical admission categories
//!
//! A category is the unit over which baselines, pre-onset ratios, regime curves and
//! ICU coefficients are computed. The string form mirrors the columns of the
//! inpatient tables (`MED_EI`, `EI_05`, `IP_PRE`, `COVID`) so that JSON inputs keyed
//! by those names deserialize straight into typed keys.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Medical or surgical procedure grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProcedureType {
    Medical,
    Surgical,
}

impl ProcedureType {
    pub const ALL: [ProcedureType; 2] = [ProcedureType::Medical, ProcedureType::Surgical];

    pub fn code(&self) -> &'static str {
        match self {
            ProcedureType::Medical => "MED",
            ProcedureType::Surgical => "SURG",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "MED" => Some(ProcedureType::Medical),
            "SURG" => Some(ProcedureType::Surgical),
            _ => None,
        }
    }
}

/// How the patient entered the hospital
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AdmissionRoute {
    /// Admitted through the emergency department
    Emergency,
    /// Scheduled (elective) inpatient admission
    Scheduled,
}

impl AdmissionRoute {
    pub const ALL: [AdmissionRoute; 2] = [AdmissionRoute::Emergency, AdmissionRoute::Scheduled];

    pub fn code(&self) -> &'static str {
        match self {
            AdmissionRoute::Emergency => "EI",
            AdmissionRoute::Scheduled => "IP",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "EI" => Some(AdmissionRoute::Emergency),
            "IP" => Some(AdmissionRoute::Scheduled),
            _ => None,
        }
    }
}

const PRE_CODE: u8 = 26;

/// Major Diagnostic Category: codes 1 through 25 plus the `PRE` grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mdc(u8);

impl Mdc {
    /// Pre-MDC grouping (transplants, tracheostomies and similar high-cost stays)
    pub const PRE: Mdc = Mdc(PRE_CODE);

    pub fn new(code: u8) -> Result<Self, CoreError> {
        if (1..=25).contains(&code) {
            Ok(Mdc(code))
        } else {
            Err(CoreError::InvalidMdc(code.to_string()))
        }
    }

    /// Numeric code, `None` for `PRE`
    pub fn code(&self) -> Option<u8> {
        (self.0 != PRE_CODE).then_some(self.0)
    }

    pub fn is_pre(&self) -> bool {
        self.0 == PRE_CODE
    }

    /// All 26 groupings in table order: 01..25 then PRE
    pub fn all() -> impl Iterator<Item = Mdc> {
        (1..=25).map(Mdc).chain(std::iter::once(Mdc::PRE))
    }
}

impl fmt::Display for Mdc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{:02}", code),
            None => write!(f, "PRE"),
        }
    }
}

impl FromStr for Mdc {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "PRE" {
            return Ok(Mdc::PRE);
        }
        let code: u8 = s
            .parse()
            .map_err(|_| CoreError::InvalidMdc(s.to_string()))?;
        Mdc::new(code)
    }
}

/// Clinical admission category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Category {
    /// Procedure type by admission route (4 groups)
    Procedure {
        procedure: ProcedureType,
        route: AdmissionRoute,
    },
    /// Diagnostic category by admission route (52 groups)
    Diagnostic { mdc: Mdc, route: AdmissionRoute },
    /// Respiratory codes that track the pandemic itself
    CovidLike,
}

impl Category {
    pub fn procedure(procedure: ProcedureType, route: AdmissionRoute) -> Self {
        Category::Procedure { procedure, route }
    }

    pub fn diagnostic(mdc: Mdc, route: AdmissionRoute) -> Self {
        Category::Diagnostic { mdc, route }
    }

    pub fn route(&self) -> Option<AdmissionRoute> {
        match self {
            Category::Procedure { route, .. } | Category::Diagnostic { route, .. } => Some(*route),
            Category::CovidLike => None,
        }
    }

    pub fn is_covid_like(&self) -> bool {
        matches!(self, Category::CovidLike)
    }

    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Category::Diagnostic { .. })
    }

    /// The four procedure-type groups
    pub fn procedure_groups() -> Vec<Category> {
        ProcedureType::ALL
            .iter()
            .flat_map(|p| AdmissionRoute::ALL.iter().map(move |r| Category::procedure(*p, *r)))
            .collect()
    }

    /// The 52 diagnostic groups, ordered by MDC then route
    pub fn diagnostic_groups() -> Vec<Category> {
        Mdc::all()
            .flat_map(|mdc| {
                AdmissionRoute::ALL
                    .iter()
                    .map(move |route| Category::diagnostic(mdc, *route))
            })
            .collect()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Procedure { procedure, route } => {
                write!(f, "{}_{}", procedure.code(), route.code())
            }
            Category::Diagnostic { mdc, route } => write!(f, "{}_{}", route.code(), mdc),
            Category::CovidLike => write!(f, "COVID"),
        }
    }
}

impl FromStr for Category {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "COVID" {
            return Ok(Category::CovidLike);
        }
        let (head, tail) = s
            .split_once('_')
            .ok_or_else(|| CoreError::UnknownCategory(s.to_string()))?;

        if let (Some(procedure), Some(route)) =
            (ProcedureType::from_code(head), AdmissionRoute::from_code(tail))
        {
            return Ok(Category::procedure(procedure, route));
        }
        if let Some(route) = AdmissionRoute::from_code(head) {
            let mdc = tail
                .parse::<Mdc>()
                .map_err(|_| CoreError::UnknownCategory(s.to_string()))?;
            return Ok(Category::diagnostic(mdc, route));
        }
        Err(CoreError::UnknownCategory(s.to_string()))
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.to_string()
    }
}

impl TryFrom<String> for Category {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Ordered mapping from category to a per-category value.
///
/// Iteration order is the derived `Category` order, so every pass over a map is
/// deterministic regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryMap<T>(BTreeMap<Category, T>);

impl<T> Default for CategoryMap<T> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<T> CategoryMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: Category, value: T) -> Option<T> {
        self.0.insert(category, value)
    }

    pub fn get(&self, category: &Category) -> Option<&T> {
        self.0.get(category)
    }

    pub fn get_mut(&mut self, category: &Category) -> Option<&mut T> {
        self.0.get_mut(category)
    }

    /// Look up a category that the caller's contract says must be present
    pub fn require(&self, category: &Category) -> Result<&T, CoreError> {
        self.0
            .get(category)
            .ok_or(CoreError::MissingCategory(*category))
    }

    pub fn contains(&self, category: &Category) -> bool {
        self.0.contains_key(category)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Category, T> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Category> {
        self.0.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.0.values()
    }

    /// Apply `f` to every value, keeping the keys
    pub fn map_values<U, F>(&self, mut f: F) -> CategoryMap<U>
    where
        F: FnMut(&Category, &T) -> U,
    {
        CategoryMap(self.0.iter().map(|(k, v)| (*k, f(k, v))).collect())
    }

    /// Fallible version of [`CategoryMap::map_values`]
    pub fn try_map_values<U, E, F>(&self, mut f: F) -> Result<CategoryMap<U>, E>
    where
        F: FnMut(&Category, &T) -> Result<U, E>,
    {
        let mut out = BTreeMap::new();
        for (k, v) in &self.0 {
            out.insert(*k, f(k, v)?);
        }
        Ok(CategoryMap(out))
    }
}

impl<T> FromIterator<(Category, T)> for CategoryMap<T> {
    fn from_iter<I: IntoIterator<Item = (Category, T)>>(iter: I) -> Self {
        CategoryMap(iter.into_iter().collect())
    }
}

impl<T> IntoIterator for CategoryMap<T> {
    type Item = (Category, T);
    type IntoIter = btree_map::IntoIter<Category, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a CategoryMap<T> {
    type Item = (&'a Category, &'a T);
    type IntoIter = btree_map::Iter<'a, Category, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_keys_round_trip() {
        for key in ["MED_EI", "SURG_IP", "EI_05", "IP_25", "EI_PRE", "COVID"] {
            let category: Category = key.parse().unwrap();
            assert_eq!(category.to_string(), key);
        }
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!("EI_26".parse::<Category>().is_err());
        assert!("EI_00".parse::<Category>().is_err());
        assert!("XX_EI".parse::<Category>().is_err());
        assert!("MED".parse::<Category>().is_err());
    }

    #[test]
    fn test_group_sizes() {
        assert_eq!(Category::procedure_groups().len(), 4);
        let diagnostic = Category::diagnostic_groups();
        assert_eq!(diagnostic.len(), 52);
        assert_eq!(diagnostic[0].to_string(), "EI_01");
        assert_eq!(diagnostic[51].to_string(), "IP_PRE");
    }

    #[test]
    fn test_category_map_serializes_with_string_keys() {
        let mut map = CategoryMap::new();
        map.insert(Category::CovidLike, 1.5);
        map.insert("IP_14".parse().unwrap(), 2.0);

        let json = serde_json::to_string(&map).unwrap();
        assert!(json.contains("\"IP_14\":2.0"));

        let back: CategoryMap<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_require_reports_missing_category() {
        let map: CategoryMap<f64> = CategoryMap::new();
        let err = map.require(&Category::CovidLike).unwrap_err();
        assert!(err.to_string().contains("COVID"));
    }
}
