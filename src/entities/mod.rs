pub mod catalog_entry;
pub mod not_found_record;
pub mod playlist_mapping;
