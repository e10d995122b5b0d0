//! Per-lineage tag repositories and the tag query algebra.

use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

use crate::core::random::RandomSource;
use crate::schema::tags::TagSet;
use crate::schema::template::{RepositoryId, TemplateId};

/// A tag filter: `with_any` ∩ `with_all` ∩ ¬`without`.
///
/// An empty `with_any` set is no filter at all, not an empty union.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagQuery {
    with_any: TagSet,
    with_all: TagSet,
    without: TagSet,
}

impl TagQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a query string.
    ///
    /// Bare tokens are required (`with_all`), `?tag` or `tag?` is optional
    /// (`with_any`), `!tag` excludes (`without`).
    pub fn parse(input: &str) -> Self {
        let mut query = Self::default();
        for token in input.split_whitespace() {
            if let Some(tag) = token.strip_prefix('!') {
                query = query.without(tag);
            } else if let Some(tag) = token.strip_prefix('?').or_else(|| token.strip_suffix('?')) {
                query = query.with_any(tag);
            } else {
                query = query.with_all(token);
            }
        }
        query
    }

    pub fn with_any(mut self, tags: &str) -> Self {
        self.with_any = self.with_any.union(&TagSet::parse(tags));
        self
    }

    pub fn with_all(mut self, tags: &str) -> Self {
        self.with_all = self.with_all.union(&TagSet::parse(tags));
        self
    }

    pub fn without(mut self, tags: &str) -> Self {
        self.without = self.without.union(&TagSet::parse(tags));
        self
    }

    pub fn any_tags(&self) -> &TagSet {
        &self.with_any
    }

    pub fn all_tags(&self) -> &TagSet {
        &self.with_all
    }

    pub fn excluded_tags(&self) -> &TagSet {
        &self.without
    }

    /// True when no filter is set; such a query matches everything.
    pub fn is_empty(&self) -> bool {
        self.with_any.is_empty() && self.with_all.is_empty() && self.without.is_empty()
    }

    pub fn matches(&self, tags: &TagSet) -> bool {
        (self.with_any.is_empty() || tags.intersects(&self.with_any))
            && tags.is_superset(&self.with_all)
            && !tags.intersects(&self.without)
    }

    fn admits(&self, tags: &TagSet) -> bool {
        tags.is_superset(&self.with_all) && !tags.intersects(&self.without)
    }

    /// +1 for each optional tag present, -1 for each tag the query never mentions.
    fn rank(&self, tags: &TagSet) -> i64 {
        tags.iter()
            .map(|tag| {
                if self.with_any.contains(tag) {
                    1
                } else if self.with_all.contains(tag) {
                    0
                } else {
                    -1
                }
            })
            .sum()
    }
}

impl fmt::Display for TagQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.with_all.sorted().iter().map(|t| t.to_string()).collect();
        parts.extend(self.with_any.sorted().iter().map(|t| format!("?{t}")));
        parts.extend(self.without.sorted().iter().map(|t| format!("!{t}")));
        write!(f, "{}", parts.join(" "))
    }
}

/// Registry of the non-abstract templates of one lineage and their tags.
///
/// Written only while templates are declared; read-only afterwards.
#[derive(Debug, Clone)]
pub struct TagRepository {
    id: RepositoryId,
    root: TemplateId,
    entries: Vec<(TemplateId, TagSet)>,
    by_tag: FxHashMap<String, FxHashSet<TemplateId>>,
}

impl TagRepository {
    pub(crate) fn new(id: RepositoryId, root: TemplateId) -> Self {
        Self {
            id,
            root,
            entries: Vec::new(),
            by_tag: FxHashMap::default(),
        }
    }

    pub fn id(&self) -> RepositoryId {
        self.id
    }

    /// The template whose declaration created this repository.
    pub fn root(&self) -> TemplateId {
        self.root
    }

    pub(crate) fn register(&mut self, template: TemplateId, tags: TagSet) {
        for tag in tags.iter() {
            self.by_tag
                .entry(tag.to_string())
                .or_default()
                .insert(template);
        }
        self.entries.push((template, tags));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, template: TemplateId) -> bool {
        self.entries.iter().any(|(id, _)| *id == template)
    }

    /// Reverse lookup: the tags a template was registered with.
    pub fn tags_of(&self, template: TemplateId) -> Option<&TagSet> {
        self.entries
            .iter()
            .find(|(id, _)| *id == template)
            .map(|(_, tags)| tags)
    }

    /// Registered templates in registration order.
    pub fn templates(&self) -> impl Iterator<Item = TemplateId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    pub fn all(&self) -> FxHashSet<TemplateId> {
        self.templates().collect()
    }

    /// Every template carrying `tag`.
    pub fn query_tag(&self, tag: &str) -> FxHashSet<TemplateId> {
        crate::schema::tags::normalize(tag)
            .and_then(|tag| self.by_tag.get(&tag))
            .cloned()
            .unwrap_or_default()
    }

    /// Union: templates carrying at least one of the tags.
    pub fn query_any(&self, tags: &str) -> FxHashSet<TemplateId> {
        let mut result = FxHashSet::default();
        for tag in TagSet::parse(tags).iter() {
            if let Some(ids) = self.by_tag.get(tag) {
                result.extend(ids.iter().copied());
            }
        }
        result
    }

    /// Intersection: templates carrying every tag. No tags matches everything.
    pub fn query_all(&self, tags: &str) -> FxHashSet<TemplateId> {
        let required = TagSet::parse(tags);
        self.entries
            .iter()
            .filter(|(_, t)| t.is_superset(&required))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Difference: templates carrying none of the tags.
    pub fn query_without(&self, tags: &str) -> FxHashSet<TemplateId> {
        let excluded = TagSet::parse(tags);
        self.entries
            .iter()
            .filter(|(_, t)| !t.intersects(&excluded))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn query(&self, query: &TagQuery) -> FxHashSet<TemplateId> {
        self.entries
            .iter()
            .filter(|(_, tags)| query.matches(tags))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Matches of `query` in registration order.
    pub fn query_ordered(&self, query: &TagQuery) -> Vec<TemplateId> {
        self.entries
            .iter()
            .filter(|(_, tags)| query.matches(tags))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Pick the best match for `query`.
    ///
    /// Candidates must carry every `with_all` tag and no `without` tag. They
    /// are ranked by optional tags present minus unrelated tags carried, and
    /// ties are broken with `rng`.
    pub fn select(&self, query: &TagQuery, rng: &mut dyn RandomSource) -> Option<TemplateId> {
        let ranked: Vec<(i64, TemplateId)> = self
            .entries
            .iter()
            .filter(|(_, tags)| query.admits(tags))
            .map(|(id, tags)| (query.rank(tags), *id))
            .collect();

        let top = ranked.iter().map(|(rank, _)| *rank).max()?;
        let contenders: Vec<TemplateId> = ranked
            .into_iter()
            .filter(|(rank, _)| *rank == top)
            .map(|(_, id)| id)
            .collect();

        Some(match contenders.len() {
            1 => contenders[0],
            n => contenders[rng.choose_index(n)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::random::{seeded, ScriptedRandom};
    use proptest::prelude::*;

    fn ids(list: &[u32]) -> FxHashSet<TemplateId> {
        list.iter().map(|&i| TemplateId(i)).collect()
    }

    fn armory() -> TagRepository {
        let mut repo = TagRepository::new(RepositoryId(0), TemplateId(0));
        repo.register(TemplateId(1), TagSet::parse("weapon club primitive"));
        repo.register(TemplateId(2), TagSet::parse("weapon spear primitive piercing"));
        repo.register(TemplateId(3), TagSet::parse("weapon sword metal piercing"));
        repo.register(TemplateId(4), TagSet::parse("armor metal"));
        repo
    }

    #[test]
    fn reverse_lookup_and_membership() {
        let repo = armory();
        assert_eq!(repo.len(), 4);
        assert!(repo.contains(TemplateId(2)));
        assert!(!repo.contains(TemplateId(9)));
        assert!(repo.tags_of(TemplateId(4)).unwrap().contains("metal"));
        assert!(repo.tags_of(TemplateId(9)).is_none());
    }

    #[test]
    fn single_tag_queries() {
        let repo = armory();
        assert_eq!(repo.query_tag("Primitive"), ids(&[1, 2]));
        assert!(repo.query_tag("magic").is_empty());
        assert_eq!(repo.query_any("club armor"), ids(&[1, 4]));
        assert_eq!(repo.query_all("weapon piercing"), ids(&[2, 3]));
        assert_eq!(repo.query_without("weapon"), ids(&[4]));
    }

    #[test]
    fn composite_query() {
        let repo = armory();
        let query = TagQuery::new().with_all("weapon").with_any("metal primitive").without("club");
        assert_eq!(repo.query(&query), ids(&[2, 3]));
        assert_eq!(repo.query_ordered(&query), vec![TemplateId(2), TemplateId(3)]);
    }

    #[test]
    fn empty_query_returns_everything() {
        let repo = armory();
        assert_eq!(repo.query(&TagQuery::new()), repo.all());
    }

    #[test]
    fn empty_repository_queries_are_empty() {
        let repo = TagRepository::new(RepositoryId(0), TemplateId(0));
        assert!(repo.query(&TagQuery::parse("weapon")).is_empty());
        assert!(repo.select(&TagQuery::new(), &mut seeded(1)).is_none());
    }

    #[test]
    fn parse_prefixes() {
        let query = TagQuery::parse("weapon ?metal primitive? !club");
        assert_eq!(query.all_tags().sorted(), vec!["weapon"]);
        assert_eq!(query.any_tags().sorted(), vec!["metal", "primitive"]);
        assert_eq!(query.excluded_tags().sorted(), vec!["club"]);
        assert_eq!(query.to_string(), "weapon ?metal ?primitive !club");
    }

    #[test]
    fn select_prefers_optional_matches() {
        let repo = armory();
        let query = TagQuery::parse("weapon ?metal ?piercing");
        let mut rng = seeded(3);
        assert_eq!(repo.select(&query, &mut rng), Some(TemplateId(3)));
    }

    #[test]
    fn select_penalises_extra_tags() {
        let mut repo = TagRepository::new(RepositoryId(0), TemplateId(0));
        repo.register(TemplateId(1), TagSet::parse("weapon"));
        repo.register(TemplateId(2), TagSet::parse("weapon heavy ornate"));
        let mut rng = seeded(3);
        assert_eq!(repo.select(&TagQuery::parse("weapon"), &mut rng), Some(TemplateId(1)));
    }

    #[test]
    fn select_breaks_ties_with_rng() {
        let mut repo = TagRepository::new(RepositoryId(0), TemplateId(0));
        repo.register(TemplateId(1), TagSet::parse("weapon"));
        repo.register(TemplateId(2), TagSet::parse("weapon"));
        let query = TagQuery::parse("weapon");
        assert_eq!(repo.select(&query, &mut ScriptedRandom::new([1])), Some(TemplateId(2)));
        assert_eq!(repo.select(&query, &mut ScriptedRandom::new([0])), Some(TemplateId(1)));
    }

    const VOCAB: [&str; 5] = ["a", "b", "c", "d", "e"];

    fn tag_set_strategy() -> impl Strategy<Value = Vec<usize>> {
        proptest::collection::vec(0..VOCAB.len(), 0..4)
    }

    fn words(picks: &[usize]) -> String {
        picks.iter().map(|&i| VOCAB[i]).collect::<Vec<_>>().join(" ")
    }

    proptest! {
        #[test]
        fn query_is_set_composition(
            population in proptest::collection::vec(tag_set_strategy(), 0..12),
            any_picks in tag_set_strategy(),
            all_picks in tag_set_strategy(),
            none_picks in tag_set_strategy(),
        ) {
            let mut repo = TagRepository::new(RepositoryId(0), TemplateId(0));
            for (i, picks) in population.iter().enumerate() {
                repo.register(TemplateId(i as u32 + 1), TagSet::parse(&words(picks)));
            }

            let (any, all, none) = (words(&any_picks), words(&all_picks), words(&none_picks));
            let query = TagQuery::new().with_any(&any).with_all(&all).without(&none);

            let union = if any.is_empty() { repo.all() } else { repo.query_any(&any) };
            let expected: FxHashSet<TemplateId> = union
                .intersection(&repo.query_all(&all))
                .copied()
                .collect::<FxHashSet<_>>()
                .intersection(&repo.query_without(&none))
                .copied()
                .collect();

            prop_assert_eq!(repo.query(&query), expected);
        }

        #[test]
        fn select_returns_an_admitted_candidate(
            population in proptest::collection::vec(tag_set_strategy(), 1..12),
            all_picks in tag_set_strategy(),
            seed in any::<u64>(),
        ) {
            let mut repo = TagRepository::new(RepositoryId(0), TemplateId(0));
            for (i, picks) in population.iter().enumerate() {
                repo.register(TemplateId(i as u32 + 1), TagSet::parse(&words(picks)));
            }
            let all = words(&all_picks);
            let query = TagQuery::new().with_all(&all);
            let admitted = repo.query_all(&all);
            match repo.select(&query, &mut seeded(seed)) {
                Some(id) => prop_assert!(admitted.contains(&id)),
                None => prop_assert!(admitted.is_empty()),
            }
        }
    }
}
