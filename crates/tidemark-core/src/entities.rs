//! Built-in entity catalog: what each pipeline queries, where it publishes, and how its
//! watermark is derived.

use chrono::Datelike;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use tidemark_bucket::ObjectRef;

use crate::query::{JoinPart, QueryPlan};
use crate::watermark::WatermarkStrategy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDefinition {
    pub name: String,
    /// Top-level folder; also the stem of the yearly object name.
    pub folder: String,
    pub strategy: WatermarkStrategy,
    pub full_load: QueryPlan,
    pub delta_load: QueryPlan,
}

impl EntityDefinition {
    /// `{folder}/{folder}{year}.parquet`. A new object starts every calendar year.
    pub fn object_key(&self, run_date: NaiveDate) -> String {
        format!("{0}/{0}{1}.parquet", self.folder, run_date.year())
    }

    pub fn destination(&self, bucket: &str, run_date: NaiveDate) -> ObjectRef {
        ObjectRef::new(bucket, self.object_key(run_date))
    }
}

const BOOKINGS_SQL: &str = r#"
    SELECT
        vehicles.vehicle_id,
        vehicles.vehicle_type,
        COUNT(bookings.booking_id) AS total_bookings,
        SUM(bookings.duration)::float8 AS total_duration,
        AVG(bookings.duration)::float8 AS avg_duration,
        MIN(bookings.start_time) AS earliest_booking,
        MAX(bookings.end_time) AS latest_booking,
        SUM(CASE WHEN bookings.is_cancelled THEN 1 ELSE 0 END) AS total_cancelled_bookings,
        ROUND(SUM(CASE WHEN bookings.is_cancelled THEN 1 ELSE 0 END) / COUNT(bookings.booking_id) * 100, 2)::float8 AS cancellation_rate
    FROM bookings
    JOIN vehicles ON bookings.vehicle_id = vehicles.vehicle_id
    WHERE vehicles.vehicle_type = 'micromobility'
    GROUP BY vehicles.vehicle_id, vehicles.vehicle_type
    ORDER BY total_bookings DESC
"#;

const ACTIVE_USERS_SQL: &str = r#"
    SELECT
        u.id AS user_id, u.locale, u.marketing_accepted,
        u.privacy_accepted, u.created_on, u.updated_on,
        p.city, p.street, p.postal_code, p.status, p.birth_date,
        p.card_status AS credit_card_status
    FROM users.user u
    INNER JOIN users.profile p ON u.id = p.user_id
"#;

const DELETED_USERS_SQL: &str = r#"
    SELECT
        u.id AS user_id, u.locale, u.marketing_accepted,
        u.privacy_accepted, u.created_on, u.updated_on,
        p.city, p.street, p.postal_code, p.status, p.birth_date,
        p.card_status AS credit_card_status
    FROM users.deleted_user u
    INNER JOIN users.deleted_profile p ON u.id = p.user_id
"#;

const TRIP_STARTS_FULL_SQL: &str = r#"
    SELECT DISTINCT ON (vehicle_trip_id)
        created_on AS start_trip_date,
        vehicle_trip_id,
        gps_lat AS start_gps_lat,
        gps_lng AS start_gps_lng
    FROM opendata.vehicle_trip_route_point
    ORDER BY vehicle_trip_id, created_on ASC
"#;

const TRIP_ENDS_FULL_SQL: &str = r#"
    SELECT DISTINCT ON (vehicle_trip_id)
        created_on AS end_trip_date,
        vehicle_trip_id AS vehicle_trip_id2,
        gps_lat AS end_gps_lat,
        gps_lng AS end_gps_lng
    FROM opendata.vehicle_trip_route_point
    ORDER BY vehicle_trip_id, created_on DESC
"#;

const TRIP_FACTS_FULL_SQL: &str = r#"
    SELECT
        id AS vehicle_trip_id3, vehicle_type,
        vehicle_id, provider_id, propulsion_type,
        trip_duration_seconds, trip_distance_meters,
        end_time, initial_odometer_km::float8 AS initial_odometer_km,
        current_odometer_km::float8 AS current_odometer_km, trip_id
    FROM opendata.vehicle_trip
    ORDER BY id
"#;

const TRIP_STARTS_DELTA_SQL: &str = r#"
    SELECT DISTINCT ON (vehicle_trip_id)
        created_on AS start_trip_date,
        vehicle_trip_id,
        gps_lat AS start_gps_lat,
        gps_lng AS start_gps_lng
    FROM opendata.vehicle_trip_route_point
    WHERE created_on > {watermark}
    ORDER BY vehicle_trip_id, created_on ASC
"#;

const TRIP_ENDS_DELTA_SQL: &str = r#"
    SELECT DISTINCT ON (vehicle_trip_id)
        created_on AS end_trip_date,
        vehicle_trip_id AS vehicle_trip_id2,
        gps_lat AS end_gps_lat,
        gps_lng AS end_gps_lng
    FROM opendata.vehicle_trip_route_point
    WHERE created_on > {watermark}
    ORDER BY vehicle_trip_id, created_on DESC
"#;

const TRIP_FACTS_DELTA_SQL: &str = r#"
    SELECT
        id AS vehicle_trip_id3, vehicle_type,
        vehicle_id, provider_id, propulsion_type,
        trip_duration_seconds, trip_distance_meters,
        end_time, initial_odometer_km::float8 AS initial_odometer_km,
        current_odometer_km::float8 AS current_odometer_km, trip_id
    FROM opendata.vehicle_trip
    WHERE start_time > {watermark}
    ORDER BY id
"#;

const VEHICLES_FULL_SQL: &str = r#"
    WITH data_cte AS (
        SELECT
            motorcycle_id,
            purchase_date,
            warranty_expiration_date,
            (warranty_expiration_date - purchase_date) AS warranty_duration,
            (CURRENT_DATE - purchase_date) AS age_in_days
        FROM fleet.vehicles
    ),
    status_cte AS (
        SELECT
            motorcycle_id,
            purchase_date,
            warranty_expiration_date,
            warranty_duration,
            ROUND(age_in_days / 365.25, 2)::float8 AS age_in_years,
            CASE
                WHEN age_in_days > warranty_duration THEN 'out of warranty'
                WHEN age_in_days <= warranty_duration THEN 'in warranty'
                ELSE 'N/A'
            END AS warranty_status
        FROM data_cte
    )
    SELECT
        motorcycle_id,
        purchase_date,
        warranty_expiration_date,
        warranty_duration,
        age_in_years,
        warranty_status,
        COUNT(*) OVER (PARTITION BY warranty_status) AS total_by_warranty_status
    FROM status_cte
    ORDER BY age_in_years DESC
"#;

const VEHICLES_DELTA_SQL: &str = r#"
    WITH data_cte AS (
        SELECT
            motorcycle_id,
            purchase_date,
            warranty_expiration_date,
            (warranty_expiration_date - purchase_date) AS warranty_duration,
            (CURRENT_DATE - purchase_date) AS age_in_days
        FROM fleet.vehicles
        WHERE created_on <= {window_end}
    ),
    status_cte AS (
        SELECT
            motorcycle_id,
            purchase_date,
            warranty_expiration_date,
            warranty_duration,
            ROUND(age_in_days / 365.25, 2)::float8 AS age_in_years,
            CASE
                WHEN age_in_days > warranty_duration THEN 'out of warranty'
                WHEN age_in_days <= warranty_duration THEN 'in warranty'
                ELSE 'N/A'
            END AS warranty_status
        FROM data_cte
    )
    SELECT
        motorcycle_id,
        purchase_date,
        warranty_expiration_date,
        warranty_duration,
        age_in_years,
        warranty_status,
        COUNT(*) OVER (PARTITION BY warranty_status) AS total_by_warranty_status
    FROM status_cte
    ORDER BY age_in_years DESC
"#;

const PARKING_AREAS_FULL_SQL: &str = r#"
    WITH parking_cte AS (
        SELECT
            area_id,
            SUM(CASE WHEN status = 'occupied' THEN 1 ELSE 0 END) AS occupied_spaces,
            SUM(CASE WHEN status = 'available' THEN 1 ELSE 0 END) AS available_spaces,
            SUM(CASE WHEN status = 'reserved' THEN 1 ELSE 0 END) AS reserved_spaces,
            COUNT(*) AS total_spaces
        FROM fleet.parking_space_status
        GROUP BY area_id
    )
    SELECT
        area_id,
        occupied_spaces,
        available_spaces,
        reserved_spaces,
        total_spaces,
        ROUND((occupied_spaces / total_spaces::float)::numeric, 2)::float8 AS occupancy_rate,
        ROUND(((available_spaces + reserved_spaces) / total_spaces::float)::numeric, 2)::float8 AS availability_rate
    FROM parking_cte
    ORDER BY occupancy_rate DESC
"#;

const PARKING_AREAS_DELTA_SQL: &str = r#"
    WITH parking_cte AS (
        SELECT
            area_id,
            SUM(CASE WHEN status = 'occupied' THEN 1 ELSE 0 END) AS occupied_spaces,
            SUM(CASE WHEN status = 'available' THEN 1 ELSE 0 END) AS available_spaces,
            SUM(CASE WHEN status = 'reserved' THEN 1 ELSE 0 END) AS reserved_spaces,
            COUNT(*) AS total_spaces
        FROM fleet.parking_space_status
        WHERE created_on <= {window_end}
          AND created_on >= {window_start}
        GROUP BY area_id
    )
    SELECT
        area_id,
        occupied_spaces,
        available_spaces,
        reserved_spaces,
        total_spaces,
        ROUND((occupied_spaces / total_spaces::float)::numeric, 2)::float8 AS occupancy_rate,
        ROUND(((available_spaces + reserved_spaces) / total_spaces::float)::numeric, 2)::float8 AS availability_rate
    FROM parking_cte
    ORDER BY occupancy_rate DESC
"#;

const VEHICLE_EVENTS_FULL_SQL: &str = r#"
    WITH numbered AS (
        SELECT
            vehicle_id,
            event_time,
            event_type,
            event_location,
            EXTRACT(MONTH FROM event_time)::int4 AS event_month,
            EXTRACT(YEAR FROM event_time)::int4 AS event_year,
            EXTRACT(EPOCH FROM event_time - LAG(event_time) OVER (PARTITION BY vehicle_id ORDER BY event_time))::float8 AS seconds_since_previous
        FROM fleet.vehicle_events
    )
    SELECT
        vehicle_id,
        event_month,
        event_year,
        COUNT(*) AS total_events,
        COUNT(DISTINCT event_location) AS unique_locations,
        COUNT(CASE WHEN event_type = 'maintenance' THEN 1 END) AS maintenance_events,
        AVG(seconds_since_previous) AS avg_time_between_events,
        MAX(event_time) AS last_event_time
    FROM numbered
    GROUP BY vehicle_id, event_month, event_year
"#;

const VEHICLE_EVENTS_DELTA_SQL: &str = r#"
    WITH numbered AS (
        SELECT
            vehicle_id,
            event_time,
            event_type,
            event_location,
            EXTRACT(MONTH FROM event_time)::int4 AS event_month,
            EXTRACT(YEAR FROM event_time)::int4 AS event_year,
            EXTRACT(EPOCH FROM event_time - LAG(event_time) OVER (PARTITION BY vehicle_id ORDER BY event_time))::float8 AS seconds_since_previous
        FROM fleet.vehicle_events
        WHERE created_on <= {window_end}
          AND created_on >= {window_start}
    )
    SELECT
        vehicle_id,
        event_month,
        event_year,
        COUNT(*) AS total_events,
        COUNT(DISTINCT event_location) AS unique_locations,
        COUNT(CASE WHEN event_type = 'maintenance' THEN 1 END) AS maintenance_events,
        AVG(seconds_since_previous) AS avg_time_between_events,
        MAX(event_time) AS last_event_time
    FROM numbered
    GROUP BY vehicle_id, event_month, event_year
"#;

fn customers_plan() -> QueryPlan {
    QueryPlan::UnionFlagged {
        primary: ACTIVE_USERS_SQL.to_string(),
        secondary: DELETED_USERS_SQL.to_string(),
        id_column: "user_id".to_string(),
        flag_column: "deleted_user".to_string(),
    }
}

fn trips_plan(starts: &str, ends: &str, facts: &str) -> QueryPlan {
    QueryPlan::InnerJoin {
        parts: vec![
            JoinPart::new(starts, "vehicle_trip_id"),
            JoinPart::new(ends, "vehicle_trip_id2"),
            JoinPart::new(facts, "vehicle_trip_id3"),
        ],
        key: "vehicle_trip_id".to_string(),
    }
}

fn entity(name: &str, strategy: WatermarkStrategy, full_load: QueryPlan, delta_load: QueryPlan) -> EntityDefinition {
    EntityDefinition {
        name: name.to_string(),
        folder: name.to_string(),
        strategy,
        full_load,
        delta_load,
    }
}

// Ordered as the nightly driver runs them.
static CATALOG: Lazy<Vec<EntityDefinition>> = Lazy::new(|| {
    vec![
        entity(
            "customers",
            WatermarkStrategy::identity_set("user_id"),
            customers_plan(),
            customers_plan(),
        ),
        entity(
            "parking_areas",
            WatermarkStrategy::identity_set("area_id"),
            QueryPlan::single(PARKING_AREAS_FULL_SQL),
            QueryPlan::single(PARKING_AREAS_DELTA_SQL),
        ),
        entity(
            "vehicles",
            WatermarkStrategy::identity_set("motorcycle_id"),
            QueryPlan::single(VEHICLES_FULL_SQL),
            QueryPlan::single(VEHICLES_DELTA_SQL),
        ),
        entity(
            "vehicle_events",
            WatermarkStrategy::timestamp("last_event_time"),
            QueryPlan::single(VEHICLE_EVENTS_FULL_SQL),
            QueryPlan::single(VEHICLE_EVENTS_DELTA_SQL),
        ),
        entity(
            "bookings",
            WatermarkStrategy::timestamp("latest_booking"),
            QueryPlan::single(BOOKINGS_SQL),
            QueryPlan::single(BOOKINGS_SQL),
        ),
        entity(
            "trips",
            WatermarkStrategy::timestamp("start_trip_date"),
            trips_plan(TRIP_STARTS_FULL_SQL, TRIP_ENDS_FULL_SQL, TRIP_FACTS_FULL_SQL),
            trips_plan(TRIP_STARTS_DELTA_SQL, TRIP_ENDS_DELTA_SQL, TRIP_FACTS_DELTA_SQL),
        ),
    ]
});

pub fn builtin_entities() -> &'static [EntityDefinition] {
    CATALOG.as_slice()
}

pub fn find_builtin(name: &str) -> Option<&'static EntityDefinition> {
    CATALOG.iter().find(|entity| entity.name == name)
}
