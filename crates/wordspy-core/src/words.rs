use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

/// Pseudo-option offered in the pre-game category vote. A vote for it
/// (or a timed-out vote) resolves to a uniformly drawn real category.
pub const RANDOM_CATEGORY_ID: &str = "random";

/// A selectable word category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryOption {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

/// One round's hidden words: the majority of players share `majority`,
/// the spy alone receives `spy`. The two are always distinct but close
/// enough that descriptions stay ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordPair {
    pub majority: String,
    pub spy: String,
}

struct Category {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    pairs: &'static [(&'static str, &'static str)],
}

static CATALOG: &[Category] = &[
    Category {
        id: "food",
        name: "Food & Drink",
        description: "Things you eat and drink",
        pairs: &[
            ("coffee", "tea"),
            ("pizza", "flatbread"),
            ("butter", "margarine"),
            ("orange juice", "lemonade"),
            ("dumpling", "ravioli"),
        ],
    },
    Category {
        id: "animals",
        name: "Animals",
        description: "Creatures wild and tame",
        pairs: &[
            ("wolf", "dog"),
            ("crow", "raven"),
            ("dolphin", "shark"),
            ("bee", "wasp"),
            ("rabbit", "hare"),
        ],
    },
    Category {
        id: "places",
        name: "Places",
        description: "Locations near and far",
        pairs: &[
            ("library", "bookstore"),
            ("beach", "lakeshore"),
            ("hospital", "clinic"),
            ("cinema", "theatre"),
            ("airport", "train station"),
        ],
    },
    Category {
        id: "objects",
        name: "Everyday Objects",
        description: "Things around the house",
        pairs: &[
            ("pencil", "pen"),
            ("mirror", "window"),
            ("ladder", "staircase"),
            ("umbrella", "raincoat"),
            ("wallet", "purse"),
        ],
    },
    Category {
        id: "sports",
        name: "Sports",
        description: "Games people play",
        pairs: &[
            ("football", "rugby"),
            ("chess", "checkers"),
            ("tennis", "badminton"),
            ("skiing", "snowboarding"),
            ("boxing", "wrestling"),
        ],
    },
];

/// All selectable categories, without the `random` pseudo-option.
pub fn categories() -> Vec<CategoryOption> {
    CATALOG.iter().map(to_option).collect()
}

/// Categories as presented for a pre-game vote: the real catalog plus
/// the `random` pseudo-option appended last.
pub fn vote_options() -> Vec<CategoryOption> {
    let mut opts = categories();
    opts.push(CategoryOption {
        id: RANDOM_CATEGORY_ID.to_string(),
        name: "Random".to_string(),
        description: Some("Let the server pick".to_string()),
    });
    opts
}

/// Look up a real category by id. The `random` pseudo-option is not a
/// real category and resolves to `None` here.
pub fn find_category(id: &str) -> Option<CategoryOption> {
    CATALOG.iter().find(|c| c.id == id).map(to_option)
}

/// Category used when no pre-game vote is configured.
pub fn default_category() -> CategoryOption {
    to_option(&CATALOG[0])
}

/// Draw a uniformly random real category.
pub fn random_category<R: Rng + ?Sized>(rng: &mut R) -> CategoryOption {
    to_option(&CATALOG[rng.random_range(0..CATALOG.len())])
}

/// Draw a word pair from the given category. Sides are swapped with
/// probability 1/2 so the spy word is not predictable from the catalog.
pub fn draw_pair<R: Rng + ?Sized>(category_id: &str, rng: &mut R) -> Option<WordPair> {
    let cat = CATALOG.iter().find(|c| c.id == category_id)?;
    let &(a, b) = cat.pairs.choose(rng)?;
    let (majority, spy) = if rng.random_bool(0.5) { (a, b) } else { (b, a) };
    Some(WordPair {
        majority: majority.to_string(),
        spy: spy.to_string(),
    })
}

fn to_option(c: &Category) -> CategoryOption {
    CategoryOption {
        id: c.id.to_string(),
        name: c.name.to_string(),
        description: Some(c.description.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn catalog_pairs_are_distinct_words() {
        for cat in CATALOG {
            for (a, b) in cat.pairs {
                assert_ne!(a, b, "identical pair in {}", cat.id);
            }
        }
    }

    #[test]
    fn vote_options_end_with_random() {
        let opts = vote_options();
        assert_eq!(opts.last().unwrap().id, RANDOM_CATEGORY_ID);
        assert_eq!(opts.len(), categories().len() + 1);
    }

    #[test]
    fn find_category_rejects_random_pseudo_option() {
        assert!(find_category(RANDOM_CATEGORY_ID).is_none());
        assert!(find_category("animals").is_some());
    }

    #[test]
    fn draw_pair_unknown_category() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(draw_pair("no-such", &mut rng).is_none());
    }

    #[test]
    fn draw_pair_swaps_sides_eventually() {
        // Across enough draws both orientations of some pair must appear.
        let mut rng = StdRng::seed_from_u64(2);
        let mut majorities = std::collections::HashSet::new();
        for _ in 0..100 {
            let pair = draw_pair("animals", &mut rng).unwrap();
            assert_ne!(pair.majority, pair.spy);
            majorities.insert(pair.majority);
        }
        assert!(majorities.len() > CATALOG[1].pairs.len());
    }
}
