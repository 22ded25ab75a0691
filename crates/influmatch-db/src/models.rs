/// Database row types — these map directly to SQLite rows.
/// Distinct from the influmatch-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub role: String,
    pub verified: bool,
    pub created_at: String,
}

pub struct RoomRow {
    pub id: String,
    pub brand_id: String,
    pub influencer_id: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: String,
}
