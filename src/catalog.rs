use chrono::{DateTime, Local, TimeDelta};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Wikipedia,
    Weather,
    News,
    Finance,
    Science,
    Entertainment,
    Technology,
    Lifestyle,
    Animals,
    Sports,
    Food,
    Art,
    Books,
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::Wikipedia,
        Category::Weather,
        Category::News,
        Category::Finance,
        Category::Science,
        Category::Entertainment,
        Category::Technology,
        Category::Lifestyle,
        Category::Animals,
        Category::Sports,
        Category::Food,
        Category::Art,
        Category::Books,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    Spanish,
    French,
    German,
    Japanese,
    Chinese,
    Portuguese,
    Italian,
    Russian,
    Arabic,
    Korean,
    Hindi,
}

impl Language {
    pub const ALL: [Language; 12] = [
        Language::English,
        Language::Spanish,
        Language::French,
        Language::German,
        Language::Japanese,
        Language::Chinese,
        Language::Portuguese,
        Language::Italian,
        Language::Russian,
        Language::Arabic,
        Language::Korean,
        Language::Hindi,
    ];

    pub fn wikipedia_code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Spanish => "es",
            Language::French => "fr",
            Language::German => "de",
            Language::Japanese => "ja",
            Language::Chinese => "zh",
            Language::Portuguese => "pt",
            Language::Italian => "it",
            Language::Russian => "ru",
            Language::Arabic => "ar",
            Language::Korean => "ko",
            Language::Hindi => "hi",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Spanish => "Spanish",
            Language::French => "French",
            Language::German => "German",
            Language::Japanese => "Japanese",
            Language::Chinese => "Chinese",
            Language::Portuguese => "Portuguese",
            Language::Italian => "Italian",
            Language::Russian => "Russian",
            Language::Arabic => "Arabic",
            Language::Korean => "Korean",
            Language::Hindi => "Hindi",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub category: Category,
    pub language: Option<Language>,
    pub description: String,
}

impl Endpoint {
    fn new(url: impl Into<String>, category: Category, language: Option<Language>, description: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            category,
            language,
            description: description.into(),
        }
    }
}

const CITIES: &[(&str, &str, &str)] = &[
    ("51.5074", "-0.1278", "London"),
    ("35.6762", "139.6503", "Tokyo"),
    ("40.7128", "-74.0060", "NYC"),
    ("-33.8688", "151.2093", "Sydney"),
    ("48.8566", "2.3522", "Paris"),
    ("19.4326", "-99.1332", "Mexico City"),
    ("-23.5505", "-46.6333", "Sao Paulo"),
    ("55.7558", "37.6173", "Moscow"),
    ("1.3521", "103.8198", "Singapore"),
    ("25.2048", "55.2708", "Dubai"),
    ("39.9042", "116.4074", "Beijing"),
    ("28.6139", "77.2090", "New Delhi"),
    ("37.5665", "126.9780", "Seoul"),
    ("52.5200", "13.4050", "Berlin"),
];

const SUBREDDITS: &[&str] = &[
    "worldnews",
    "books",
    "art",
    "photography",
    "cooking",
    "fitness",
    "gardening",
    "travel",
    "sports",
    "science",
    "technology",
    "movies",
];

const MISC: &[(&str, Category, &str)] = &[
    ("https://hacker-news.firebaseio.com/v0/topstories.json", Category::Technology, "Hacker News"),
    ("https://api.coindesk.com/v1/bpi/currentprice.json", Category::Finance, "Bitcoin price"),
    ("https://api.spacexdata.com/v4/launches/latest", Category::Science, "SpaceX launch"),
    ("https://api.github.com/events", Category::Technology, "GitHub events"),
    ("https://dog.ceo/api/breeds/image/random", Category::Animals, "Random dog"),
    ("https://catfact.ninja/fact", Category::Animals, "Cat fact"),
    ("https://www.boredapi.com/api/activity", Category::Entertainment, "Activity suggestion"),
    ("https://api.artic.edu/api/v1/artworks?limit=1", Category::Art, "Art Institute artwork"),
    ("https://openlibrary.org/search.json?q=fiction&limit=1", Category::Books, "Fiction books"),
    ("https://www.themealdb.com/api/json/v1/1/random.php", Category::Food, "Random recipe"),
    ("https://www.thesportsdb.com/api/v1/json/3/all_sports.php", Category::Sports, "Sports list"),
    ("https://api.quotable.io/random", Category::Lifestyle, "Random quote"),
];

pub fn builtin_catalog() -> Vec<Endpoint> {
    let mut endpoints = Vec::new();

    for language in Language::ALL {
        endpoints.push(Endpoint::new(
            format!(
                "https://{}.wikipedia.org/api/rest_v1/page/random/summary",
                language.wikipedia_code()
            ),
            Category::Wikipedia,
            Some(language),
            format!("{} Wikipedia article", language.name()),
        ));
    }

    for (lat, lon, city) in CITIES {
        endpoints.push(Endpoint::new(
            format!(
                "https://api.open-meteo.com/v1/forecast?latitude={lat}&longitude={lon}&current=temperature_2m"
            ),
            Category::Weather,
            Some(Language::English),
            format!("Weather in {city}"),
        ));
    }

    for sub in SUBREDDITS {
        endpoints.push(Endpoint::new(
            format!("https://www.reddit.com/r/{sub}.json?limit=1"),
            Category::News,
            Some(Language::English),
            format!("Reddit r/{sub}"),
        ));
    }

    for (url, category, description) in MISC {
        endpoints.push(Endpoint::new(*url, *category, Some(Language::English), *description));
    }

    endpoints
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointState {
    pub last_call: Option<DateTime<Local>>,
    pub consecutive_failures: u32,
}

/// Static catalog plus in-memory per-endpoint cooldown and failure streaks.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    endpoints: Vec<Endpoint>,
    state: HashMap<String, EndpointState>,
    cooldown: TimeDelta,
    failure_threshold: u32,
}

impl RateLimiter {
    pub fn new(endpoints: Vec<Endpoint>, cooldown: TimeDelta, failure_threshold: u32) -> Self {
        Self {
            endpoints,
            state: HashMap::new(),
            cooldown,
            failure_threshold,
        }
    }

    pub fn set_limits(&mut self, cooldown: TimeDelta, failure_threshold: u32) {
        self.cooldown = cooldown;
        self.failure_threshold = failure_threshold;
    }

    #[cfg(test)]
    pub fn state_of(&self, url: &str) -> EndpointState {
        self.state.get(url).copied().unwrap_or_default()
    }

    pub fn select<R: Rng + ?Sized>(
        &self,
        categories: &HashSet<Category>,
        languages: &HashSet<Language>,
        now: DateTime<Local>,
        rng: &mut R,
    ) -> Option<Endpoint> {
        let available: Vec<&Endpoint> = self
            .endpoints
            .iter()
            .filter(|e| categories.contains(&e.category))
            .filter(|e| e.language.is_none_or(|lang| languages.contains(&lang)))
            .filter(|e| self.is_eligible(&e.url, now))
            .collect();

        available.choose(rng).map(|e| (*e).clone())
    }

    pub fn is_eligible(&self, url: &str, now: DateTime<Local>) -> bool {
        let Some(state) = self.state.get(url) else {
            return true;
        };
        let Some(last_call) = state.last_call else {
            return true;
        };

        let elapsed = now - last_call;
        if elapsed < self.cooldown {
            return false;
        }
        if state.consecutive_failures >= self.failure_threshold {
            let backoff = self.cooldown * state.consecutive_failures as i32;
            if elapsed < backoff {
                return false;
            }
        }
        true
    }

    pub fn record_outcome(&mut self, url: &str, success: bool, now: DateTime<Local>) {
        let state = self.state.entry(url.to_string()).or_default();
        state.last_call = Some(now);
        if success {
            state.consecutive_failures = 0;
        } else {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        }
    }
}
