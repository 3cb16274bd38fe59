//! Query expansion via a fixed German administrative-law thesaurus
//! (§4.7 `expand_query`).

use std::sync::LazyLock;

/// Seed categories mapping a term to its synonyms. Each entry is one
/// administrative-law concept; at least 30 are required by §4.7.
static THESAURUS: LazyLock<Vec<(&'static str, &'static [&'static str])>> = LazyLock::new(|| {
    vec![
        ("antrag", &["gesuch", "ersuchen", "beantragung"]),
        ("genehmigung", &["erlaubnis", "bewilligung", "zustimmung"]),
        ("bescheid", &["entscheid", "verfügung", "entscheidung"]),
        ("widerspruch", &["einspruch", "beschwerde", "einwendung"]),
        ("behörde", &["amt", "dienststelle", "verwaltungsstelle"]),
        ("verwaltung", &["administration", "amtsführung"]),
        ("gesetz", &["norm", "rechtsvorschrift", "regelung"]),
        ("verordnung", &["vorschrift", "satzung", "regelwerk"]),
        ("frist", &["zeitraum", "termin", "fälligkeit"]),
        ("gebühr", &["abgabe", "kosten", "entgelt"]),
        ("bauantrag", &["baugesuch", "bauvoranfrage", "baugenehmigung", "bauantragsverfahren"]),
        ("baugenehmigung", &["baubewilligung", "bauerlaubnis"]),
        ("meldepflicht", &["anzeigepflicht", "mitteilungspflicht"]),
        ("zuständigkeit", &["kompetenz", "befugnis"]),
        ("anhörung", &["stellungnahme", "gehör"]),
        ("rechtsmittel", &["klage", "rechtsbehelf"]),
        ("vollstreckung", &["durchsetzung", "zwangsvollstreckung"]),
        ("auflage", &["bedingung", "nebenbestimmung"]),
        ("ermessen", &["beurteilungsspielraum", "entscheidungsspielraum"]),
        ("amtshilfe", &["verwaltungshilfe", "behördliche unterstützung"]),
        ("akteneinsicht", &["einsichtnahme", "aktenzugang"]),
        ("datenschutz", &["persönlichkeitsschutz", "informationsschutz"]),
        ("zuwendung", &["förderung", "subvention", "beihilfe"]),
        ("verwaltungsakt", &["hoheitlicher akt", "behördliche maßnahme"]),
        ("nichtigkeit", &["unwirksamkeit", "ungültigkeit"]),
        ("widerruf", &["aufhebung", "rücknahme"]),
        ("zustellung", &["bekanntgabe", "übermittlung"]),
        ("gebührenbescheid", &["kostenbescheid", "abgabenbescheid"]),
        ("einwohnermeldeamt", &["meldebehörde", "einwohnerregister"]),
        ("gewerbeanmeldung", &["gewerbeschein", "gewerbeanzeige"]),
        ("aufenthaltstitel", &["aufenthaltserlaubnis", "aufenthaltsgenehmigung"]),
        ("widerspruchsbescheid", &["einspruchsentscheidung"]),
        ("verwaltungsgericht", &["verwaltungsgerichtsbarkeit"]),
        ("ordnungswidrigkeit", &["verwaltungsübertretung", "bußgeldtatbestand"]),
    ]
});

/// Generates synonym variants of `query` from the thesaurus: the
/// original is always included, case is preserved on the original
/// occurrence, and the result is deduplicated and capped at `max`.
pub fn expand_query(query: &str, max: usize) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut expansions = vec![query.to_string()];

    for (term, synonyms) in THESAURUS.iter() {
        if lowered.contains(term) {
            for synonym in *synonyms {
                let replaced = replace_case_insensitive(&query, term, synonym);
                if !expansions.iter().any(|e| e.eq_ignore_ascii_case(&replaced)) {
                    expansions.push(replaced);
                }
            }
        }
    }

    expansions.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
    expansions.truncate(max.max(1));
    expansions
}

fn replace_case_insensitive(text: &str, from: &str, to: &str) -> String {
    let lowered = text.to_lowercase();
    match lowered.find(from) {
        Some(idx) => {
            let mut result = String::with_capacity(text.len());
            result.push_str(&text[..idx]);
            result.push_str(to);
            result.push_str(&text[idx + from.len()..]);
            result
        }
        None => text.to_string(),
    }
}
