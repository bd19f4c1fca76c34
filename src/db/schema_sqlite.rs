// SQLite schema definitions

diesel::table! {
    events (event_id) {
        event_id -> Text,
        title -> Text,
        date_str -> Text,
        time_str -> Text,
        deadline_str -> Nullable<Text>,
        teams -> Text,
        color -> BigInt,
        channel_id -> BigInt,
        message_id -> BigInt,
        active -> Bool,
        reminded -> Bool,
        created_at -> Text,
        closed_at -> Nullable<Text>,
    }
}

diesel::table! {
    registrations (event_id, user_id) {
        event_id -> Text,
        user_id -> BigInt,
        username -> Text,
        team -> Text,
        role -> Text,
        availability -> Text,
        weapons -> Nullable<Text>,
        joined_at -> Text,
    }
}

diesel::table! {
    attendance_history (id) {
        id -> Integer,
        event_id -> Text,
        recorded_on -> Text,
        user_id -> BigInt,
        username -> Text,
        status -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(events, registrations, attendance_history);
