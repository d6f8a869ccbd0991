pub mod playlist;
pub mod playlist_platform_info;
pub mod playlist_track;
pub mod track;
pub mod track_platform_info;
