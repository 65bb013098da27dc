use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::contract::{Contract, GeoPoint};

/// Driver-side search predicate. Every field is optional and an absent field
/// imposes no constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterParams {
    /// Maximum distance in kilometres between the query center and the origin.
    pub radius: Option<f64>,
    pub price: Option<f64>,
    /// Maximum mass in kilograms.
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub width: Option<f64>,
    pub length: Option<f64>,
    /// Maximum volume in cubic metres.
    pub volume: Option<f64>,
    pub required_people: Option<u32>,
    pub fragile: Option<bool>,
    pub cooling_required: Option<bool>,
    pub ride_along: Option<bool>,
    pub move_date: Option<NaiveDate>,
    pub move_date_time: Option<DateTime<Utc>>,
}

impl FilterParams {
    pub fn validate(&self) -> Result<(), AppError> {
        let ceilings = [
            ("radius", self.radius),
            ("price", self.price),
            ("weight", self.weight),
            ("height", self.height),
            ("width", self.width),
            ("length", self.length),
            ("volume", self.volume),
        ];

        for (name, value) in ceilings {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    return Err(AppError::BadRequest(format!(
                        "filter {name} must be a non-negative number"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Earliest acceptable move time, combining the date and date-time bounds.
    pub fn earliest_move(&self) -> Option<DateTime<Utc>> {
        let from_date = self
            .move_date
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc());

        match (from_date, self.move_date_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn matches(&self, contract: &Contract, center: &GeoPoint) -> bool {
        if let Some(radius) = self.radius {
            if haversine_km(center, &contract.origin.point()) > radius {
                return false;
            }
        }

        let dims = &contract.dimensions;
        let within = |ceiling: Option<f64>, value: f64| ceiling.is_none_or(|max| value <= max);

        if !within(self.price, contract.price)
            || !within(self.weight, dims.mass)
            || !within(self.height, dims.height)
            || !within(self.width, dims.width)
            || !within(self.length, dims.length)
            || !within(self.volume, dims.volume_m3())
        {
            return false;
        }

        if let Some(max_people) = self.required_people {
            if contract.required_helpers > max_people {
                return false;
            }
        }

        // A flag set to false means the driver cannot serve contracts that need it.
        let capable = |flag: Option<bool>, needed: bool| !needed || flag != Some(false);
        if !capable(self.fragile, contract.fragile)
            || !capable(self.cooling_required, contract.cooling_required)
            || !capable(self.ride_along, contract.ride_along)
        {
            return false;
        }

        if let Some(earliest) = self.earliest_move() {
            if contract.move_date < earliest {
                return false;
            }
        }

        true
    }
}

/// Rectangular map bounds. `west > east` describes a viewport that crosses
/// the antimeridian.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Viewport {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Viewport {
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Result<Self, AppError> {
        let viewport = Self {
            south,
            west,
            north,
            east,
        };
        viewport.validate()?;
        Ok(viewport)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let corners_valid = GeoPoint {
            lat: self.south,
            lng: self.west,
        }
        .is_valid()
            && GeoPoint {
                lat: self.north,
                lng: self.east,
            }
            .is_valid();

        if !corners_valid || self.south > self.north {
            return Err(AppError::BadRequest(format!(
                "invalid viewport bounds {self:?}"
            )));
        }

        Ok(())
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        if !point.is_valid() || point.lat < self.south || point.lat > self.north {
            return false;
        }

        if self.crosses_antimeridian() {
            point.lng >= self.west || point.lng <= self.east
        } else {
            point.lng >= self.west && point.lng <= self.east
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    use super::{FilterParams, Viewport};
    use crate::models::contract::{
        Contract, ContractStatus, Dimensions, GeoPoint, Location,
    };

    fn contract() -> Contract {
        Contract {
            id: 1,
            owner_id: 10,
            title: "sofa".to_string(),
            description: String::new(),
            move_date: Utc.with_ymd_and_hms(2026, 11, 2, 9, 0, 0).unwrap(),
            created_at: Utc::now(),
            origin: Location {
                lat: 47.37,
                lng: 8.54,
                address: "Zurich".to_string(),
            },
            destination: Location {
                lat: 47.05,
                lng: 8.31,
                address: "Lucerne".to_string(),
            },
            dimensions: Dimensions {
                length: 200.0,
                width: 90.0,
                height: 80.0,
                mass: 45.0,
            },
            fragile: true,
            cooling_required: false,
            ride_along: false,
            required_helpers: 2,
            price: 120.0,
            photos: Vec::new(),
            status: ContractStatus::Requested,
            winning_driver: None,
            version: 0,
        }
    }

    const ZURICH: GeoPoint = GeoPoint {
        lat: 47.3769,
        lng: 8.5417,
    };

    #[test]
    fn empty_filter_matches_everything() {
        assert!(FilterParams::default().matches(&contract(), &ZURICH));
    }

    #[test]
    fn radius_excludes_far_contracts() {
        let filter = FilterParams {
            radius: Some(5.0),
            ..Default::default()
        };
        let geneva = GeoPoint {
            lat: 46.2044,
            lng: 6.1432,
        };

        assert!(filter.matches(&contract(), &ZURICH));
        assert!(!filter.matches(&contract(), &geneva));
    }

    #[test]
    fn ceilings_are_inclusive() {
        let at_limit = FilterParams {
            price: Some(120.0),
            weight: Some(45.0),
            required_people: Some(2),
            ..Default::default()
        };
        let below = FilterParams {
            price: Some(119.99),
            ..Default::default()
        };

        assert!(at_limit.matches(&contract(), &ZURICH));
        assert!(!below.matches(&contract(), &ZURICH));
    }

    #[test]
    fn volume_ceiling_uses_cubic_metres() {
        // 200 x 90 x 80 cm = 1.44 m3
        let roomy = FilterParams {
            volume: Some(1.5),
            ..Default::default()
        };
        let cramped = FilterParams {
            volume: Some(1.0),
            ..Default::default()
        };

        assert!(roomy.matches(&contract(), &ZURICH));
        assert!(!cramped.matches(&contract(), &ZURICH));
    }

    #[test]
    fn false_flag_excludes_contracts_needing_it() {
        let no_fragile = FilterParams {
            fragile: Some(false),
            ..Default::default()
        };
        let no_cooling = FilterParams {
            cooling_required: Some(false),
            ..Default::default()
        };

        assert!(!no_fragile.matches(&contract(), &ZURICH));
        assert!(no_cooling.matches(&contract(), &ZURICH));
    }

    #[test]
    fn earliest_move_date_is_respected() {
        let before = FilterParams {
            move_date: NaiveDate::from_ymd_opt(2026, 11, 1),
            ..Default::default()
        };
        let after = FilterParams {
            move_date_time: Some(contract().move_date + Duration::hours(1)),
            ..Default::default()
        };

        assert!(before.matches(&contract(), &ZURICH));
        assert!(!after.matches(&contract(), &ZURICH));
    }

    #[test]
    fn negative_ceiling_is_rejected() {
        let filter = FilterParams {
            weight: Some(-1.0),
            ..Default::default()
        };
        assert!(filter.validate().is_err());
        assert!(FilterParams::default().validate().is_ok());
    }

    #[test]
    fn viewport_contains_points_inside_bounds() {
        let viewport = Viewport::new(47.0, 8.0, 47.5, 9.0).unwrap();

        assert!(viewport.contains(&GeoPoint {
            lat: 47.37,
            lng: 8.54
        }));
        assert!(!viewport.contains(&GeoPoint {
            lat: 46.9,
            lng: 8.54
        }));
        assert!(!viewport.contains(&GeoPoint {
            lat: f64::NAN,
            lng: 8.54
        }));
    }

    #[test]
    fn viewport_across_antimeridian() {
        let viewport = Viewport::new(-20.0, 170.0, -10.0, -170.0).unwrap();

        assert!(viewport.contains(&GeoPoint {
            lat: -15.0,
            lng: 179.5
        }));
        assert!(viewport.contains(&GeoPoint {
            lat: -15.0,
            lng: -175.0
        }));
        assert!(!viewport.contains(&GeoPoint {
            lat: -15.0,
            lng: 0.0
        }));
    }

    #[test]
    fn inverted_latitudes_are_rejected() {
        assert!(Viewport::new(10.0, 0.0, 5.0, 1.0).is_err());
    }
}
