use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicCategory {
    Cooking,
    Fitness,
    Creative,
    Tech,
    Lifestyle,
    Learning,
    Outdoor,
    Travel,
    Finance,
    Home,
    Entertainment,
    Fashion,
    Sports,
    Science,
    Automotive,
    Pets,
    Music,
    Gaming,
    Diy,
    Wellness,
}

const TOPICS: &[(TopicCategory, &[&str])] = &[
    (TopicCategory::Cooking, &["recipe", "baking", "cooking", "nutrition", "meal prep", "food photography", "culinary arts", "wine pairing", "fermentation", "sous vide", "grilling", "vegan cooking", "pastry", "sourdough", "meal planning"]),
    (TopicCategory::Fitness, &["fitness", "yoga", "running", "cycling", "swimming", "meditation", "health", "strength training", "HIIT", "pilates", "marathon training", "CrossFit", "calisthenics", "stretching", "cardio"]),
    (TopicCategory::Creative, &["painting", "drawing", "photography", "writing", "music", "pottery", "knitting", "sculpture", "calligraphy", "watercolor", "digital art", "sketching", "illustration", "printmaking", "ceramics"]),
    (TopicCategory::Tech, &["coding", "technology", "gaming", "AI", "web development", "apps", "cybersecurity", "machine learning", "blockchain", "data science", "cloud computing", "programming", "software engineering", "3D printing"]),
    (TopicCategory::Lifestyle, &["fashion", "interior design", "gardening", "minimalism", "organizing", "home decor", "sustainable living", "zero waste", "apartment living", "feng shui", "decluttering", "productivity"]),
    (TopicCategory::Learning, &["language learning", "education", "books", "history", "science", "psychology", "philosophy", "online courses", "studying techniques", "memory improvement", "speed reading", "public speaking"]),
    (TopicCategory::Outdoor, &["hiking", "camping", "fishing", "birdwatching", "travel", "wildlife", "backpacking", "rock climbing", "kayaking", "trail running", "mountaineering", "nature photography", "foraging", "astronomy"]),
    (TopicCategory::Travel, &["travel planning", "budget travel", "solo travel", "cultural experiences", "language immersion", "street food", "travel photography", "backpacking", "luxury travel", "road trips", "cruise travel", "adventure travel"]),
    (TopicCategory::Finance, &["investing", "personal finance", "budgeting", "cryptocurrency", "stock market", "real estate", "retirement planning", "passive income", "financial independence", "credit cards", "tax strategies", "wealth building"]),
    (TopicCategory::Home, &["home improvement", "gardening", "landscaping", "furniture", "power tools", "plumbing", "electrical work", "woodworking", "home renovation", "smart home", "lawn care", "composting"]),
    (TopicCategory::Entertainment, &["movies", "TV shows", "streaming", "podcasts", "stand-up comedy", "theater", "concerts", "festivals", "book clubs", "board games", "trivia", "documentary films"]),
    (TopicCategory::Fashion, &["fashion trends", "personal style", "makeup", "skincare", "hair care", "nail art", "sustainable fashion", "vintage clothing", "accessories", "streetwear", "luxury brands", "beauty routines"]),
    (TopicCategory::Sports, &["basketball", "football", "soccer", "tennis", "golf", "baseball", "hockey", "volleyball", "martial arts", "boxing", "surfing", "skateboarding", "snowboarding", "fencing"]),
    (TopicCategory::Science, &["physics", "chemistry", "biology", "astronomy", "geology", "environmental science", "neuroscience", "genetics", "quantum mechanics", "space exploration", "climate science", "oceanography"]),
    (TopicCategory::Automotive, &["car maintenance", "auto repair", "electric vehicles", "classic cars", "motorcycles", "car detailing", "performance tuning", "road trips", "car reviews", "automotive technology"]),
    (TopicCategory::Pets, &["dog training", "cat care", "aquarium", "bird keeping", "pet nutrition", "veterinary care", "pet photography", "animal behavior", "exotic pets", "pet grooming", "rescue animals"]),
    (TopicCategory::Music, &["guitar", "piano", "drums", "music theory", "singing", "music production", "DJ techniques", "songwriting", "vinyl records", "concert photography", "music history", "instrument repair"]),
    (TopicCategory::Gaming, &["video games", "esports", "game reviews", "streaming", "retro gaming", "game development", "speedrunning", "gaming PC builds", "console gaming", "indie games", "game collecting"]),
    (TopicCategory::Diy, &["woodworking", "home crafts", "upcycling", "jewelry making", "sewing", "embroidery", "leather crafting", "soap making", "candle making", "resin art", "paper crafts", "model building"]),
    (TopicCategory::Wellness, &["meditation", "mindfulness", "mental health", "stress relief", "sleep hygiene", "breathwork", "journaling", "aromatherapy", "sound healing", "life coaching", "self-care", "gratitude practice"]),
];

const ADJECTIVES: &[&str] = &[
    "best", "new", "popular", "amazing", "creative", "unique", "modern", "simple", "advanced",
    "beginner", "professional", "innovative", "practical", "useful", "comprehensive", "quick",
    "easy", "fun", "sustainable", "effective", "top", "ultimate", "essential", "trending",
    "proven", "expert", "premium", "affordable", "recommended", "complete", "detailed",
    "step-by-step", "beginner-friendly", "powerful", "efficient", "time-saving", "budget",
    "luxury", "minimalist", "eco-friendly", "organic", "natural", "scientific",
    "evidence-based", "traditional", "contemporary", "classic", "cutting-edge",
];

const OBJECTS: &[&str] = &[
    "tips", "ideas", "guide", "tutorial", "examples", "techniques", "benefits", "methods",
    "basics", "secrets", "advice", "practices", "projects", "resources", "tools", "strategies",
    "fundamentals", "hacks", "tricks", "lessons", "courses", "workshops", "books", "videos",
    "podcasts", "articles", "reviews", "comparisons", "recommendations", "checklist", "routine",
    "setup", "equipment", "supplies", "inspiration", "trends", "statistics", "facts", "myths",
    "challenges", "solutions", "case studies", "research", "analysis", "overview",
];

const VERB_PHRASES: &[&str] = &[
    "how to start", "how to improve", "how to master", "how to learn", "how to get better at",
    "ways to enhance", "steps to improve", "guide to understanding", "introduction to",
    "getting started with", "improving your", "mastering the art of", "understanding",
    "exploring", "discovering", "learning about", "developing skills in",
    "what you need to know about", "everything about", "the ultimate guide to",
];

const FALLBACK_QUERY: &str = "interesting facts";

impl TopicCategory {
    pub const ALL: [TopicCategory; 20] = [
        TopicCategory::Cooking,
        TopicCategory::Fitness,
        TopicCategory::Creative,
        TopicCategory::Tech,
        TopicCategory::Lifestyle,
        TopicCategory::Learning,
        TopicCategory::Outdoor,
        TopicCategory::Travel,
        TopicCategory::Finance,
        TopicCategory::Home,
        TopicCategory::Entertainment,
        TopicCategory::Fashion,
        TopicCategory::Sports,
        TopicCategory::Science,
        TopicCategory::Automotive,
        TopicCategory::Pets,
        TopicCategory::Music,
        TopicCategory::Gaming,
        TopicCategory::Diy,
        TopicCategory::Wellness,
    ];

    pub fn topics(self) -> &'static [&'static str] {
        TOPICS
            .iter()
            .find(|(category, _)| *category == self)
            .map(|(_, topics)| *topics)
            .unwrap_or(&[])
    }
}

pub fn generate_query<R: Rng + ?Sized>(enabled: &HashSet<TopicCategory>, rng: &mut R) -> String {
    let mut categories: Vec<TopicCategory> = enabled.iter().copied().collect();
    categories.sort();
    let Some(category) = categories.choose(rng) else {
        return FALLBACK_QUERY.to_string();
    };
    let Some(topic) = category.topics().choose(rng) else {
        return FALLBACK_QUERY.to_string();
    };
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("best");
    let object = OBJECTS.choose(rng).copied().unwrap_or("tips");
    let verb = VERB_PHRASES.choose(rng).copied().unwrap_or("introduction to");

    let templates = [
        format!("{adjective} {topic} {object}"),
        format!("{verb} {topic}"),
        format!("{topic} for beginners"),
        format!("best {topic} {object}"),
        format!("{adjective} {topic} techniques"),
        format!("why {topic} is important"),
        format!("benefits of {topic}"),
        format!("{topic} mistakes to avoid"),
        format!("advanced {topic} {object}"),
        format!("{adjective} ways to improve {topic}"),
        format!("{topic} vs alternatives"),
        format!("is {topic} worth it"),
        format!("{topic} for professionals"),
        format!("budget {topic} {object}"),
        format!("{topic} inspiration and {object}"),
        format!("common {topic} problems"),
        format!("{topic} equipment and supplies"),
        format!("latest {topic} trends"),
        format!("{adjective} {topic} routine"),
    ];

    let index = rng.gen_range(0..templates.len());
    templates[index].clone()
}
