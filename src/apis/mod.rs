// External catalog surfaces: the TMDB API and the daily bulk export

pub mod export;
pub mod tmdb;
