use rand::Rng;

/// Room codes are 6 characters drawn from an alphabet that excludes the
/// visually confusable `0 O 1 I L`. Input is case-insensitive; codes
/// are stored and displayed uppercase.
pub const CODE_LEN: usize = 6;

pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Total number of distinct room codes.
pub fn code_space() -> u64 {
    (CODE_ALPHABET.len() as u64).pow(CODE_LEN as u32)
}

/// Generate a random room code using the given rng.
pub fn generate_room_code_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Generate a random room code.
pub fn generate_room_code() -> String {
    generate_room_code_with(&mut rand::rng())
}

/// Uppercase a user-supplied code for lookup.
pub fn normalize_room_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Check that a (normalized) code has the right length and alphabet.
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..200 {
            let code = generate_room_code();
            assert!(is_valid_room_code(&code), "invalid code: {code}");
        }
    }

    #[test]
    fn alphabet_has_no_confusable_chars() {
        for c in [b'0', b'O', b'1', b'I', b'L'] {
            assert!(!CODE_ALPHABET.contains(&c));
        }
    }

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize_room_code(" ab2cd3 "), "AB2CD3");
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(!is_valid_room_code("ABC23"));
        assert!(!is_valid_room_code("ABC2345"));
        assert!(!is_valid_room_code(""));
    }

    #[test]
    fn confusable_chars_rejected() {
        assert!(!is_valid_room_code("ABC10D"));
        assert!(!is_valid_room_code("OOOOOO"));
    }

    #[test]
    fn seeded_generation_is_deterministic() {
        let a = generate_room_code_with(&mut StdRng::seed_from_u64(7));
        let b = generate_room_code_with(&mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }
}
