use rusqlite::{params, Connection, OptionalExtension};

/// Lowercase ASCII slug built from a title. Common Latin accents are folded, every other run
/// of non-alphanumeric characters becomes a single `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for ch in title.trim().chars().flat_map(char::to_lowercase) {
        let folded = fold_accent(ch);
        if folded.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(folded);
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "post".to_string()
    } else {
        slug
    }
}

fn fold_accent(ch: char) -> char {
    match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

/// Slug for `title` that no other post uses, appending `-1`, `-2`, ... on collision.
/// `ignore_post_id` lets a post keep its own slug when it is edited.
pub fn unique_slug(
    conn: &Connection,
    title: &str,
    ignore_post_id: Option<i64>,
) -> rusqlite::Result<String> {
    let base = slugify(title);
    let mut candidate = base.clone();
    let mut counter = 1;

    loop {
        let taken: Option<i64> = conn
            .query_row(
                "SELECT id FROM posts WHERE slug = ?1 AND (?2 IS NULL OR id <> ?2) LIMIT 1",
                params![candidate, ignore_post_id],
                |r| r.get(0),
            )
            .optional()?;

        if taken.is_none() {
            return Ok(candidate);
        }

        candidate = format!("{}-{}", base, counter);
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_user, pool};

    #[test]
    fn slugify_basic_titles() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("  Rust -- is  fun!  "), "rust-is-fun");
        assert_eq!(slugify("Ação e Reação"), "acao-e-reacao");
    }

    #[test]
    fn slugify_falls_back_when_nothing_is_left() {
        assert_eq!(slugify("!!!"), "post");
        assert_eq!(slugify(""), "post");
    }

    #[test]
    fn unique_slug_appends_counter_and_ignores_self() {
        let (pool, _tmp) = pool();
        let conn = pool.get().unwrap();
        let uid = insert_user(&conn, "alice");

        for slug in ["hello", "hello-1"] {
            conn.execute(
                "INSERT INTO posts (user_id, title, slug, content) VALUES (?1, 'Hello', ?2, 'c')",
                params![uid, slug],
            )
            .unwrap();
        }

        assert_eq!(unique_slug(&conn, "Hello", None).unwrap(), "hello-2");
        assert_eq!(unique_slug(&conn, "Hello", Some(1)).unwrap(), "hello");
        assert_eq!(unique_slug(&conn, "Other", None).unwrap(), "other");
    }
}
