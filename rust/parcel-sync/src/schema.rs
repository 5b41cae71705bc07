//! Diesel schema definitions for the parcel monitoring tables.

diesel::table! {
    use diesel::sql_types::*;

    parcels (id) {
        id -> Int8,
        name -> Text,
        location -> Text,
        responsible -> Text,
        crop_type -> Text,
        last_irrigation -> Nullable<Timestamptz>,
        latitude -> Float8,
        longitude -> Float8,
        active -> Bool,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    global_readings (id) {
        id -> Int8,
        humidity -> Float8,
        temperature -> Float8,
        rainfall -> Float8,
        sun_intensity -> Float8,
        captured_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    sensor_readings (id) {
        id -> Int8,
        parcel_id -> Int8,
        humidity -> Float8,
        temperature -> Float8,
        rainfall -> Float8,
        sun_intensity -> Float8,
        captured_at -> Timestamptz,
    }
}

diesel::joinable!(sensor_readings -> parcels (parcel_id));

diesel::allow_tables_to_appear_in_same_query!(parcels, global_readings, sensor_readings);
