use crate::{arena::Arena, error::CompileError, value::StringHeader};

/// Backing storage for string literals, carved out of the arena's literal
/// section. Literals are appended once per compiled occurrence and stay put
/// for the rest of the run, so cells may keep pointing at them.
#[derive(Debug)]
pub(crate) struct LiteralPool {
    next: u64,
    end: u64,
}

impl LiteralPool {
    pub(crate) fn new(arena: &Arena) -> Self {
        Self {
            next: arena.literal_base(),
            end: arena.end(),
        }
    }

    /// Copy `content` into the pool, NUL-terminated, and return the header
    /// a routine pushes for it.
    pub(crate) fn intern(
        &mut self,
        arena: &mut Arena,
        content: &[u8],
    ) -> Result<StringHeader, CompileError> {
        let needed = content.len() + 1;
        let remaining = (self.end - self.next) as usize;
        if needed > remaining {
            return Err(CompileError::LiteralSectionExhausted {
                len: needed,
                remaining,
            });
        }

        let address = self.next;
        let stored = arena
            .write_bytes(address, content)
            .and_then(|()| arena.write_u8(address + content.len() as u64, 0));
        if stored.is_err() {
            return Err(CompileError::LiteralSectionExhausted {
                len: needed,
                remaining,
            });
        }
        self.next += needed as u64;

        Ok(StringHeader::new(address, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn arena(literal_section_size: usize) -> Arena {
        let config = EngineConfig {
            literal_section_size,
            ..EngineConfig::default()
        };
        let mut arena = Arena::create(&config).unwrap();
        arena.initialize();
        arena
    }

    #[test]
    fn literals_are_appended_back_to_back() {
        let mut arena = arena(0x100);
        let mut pool = LiteralPool::new(&arena);
        let first = pool.intern(&mut arena, b"abc").unwrap();
        let second = pool.intern(&mut arena, b"de").unwrap();

        assert_eq!(first.ptr, arena.literal_base());
        assert_eq!(second.ptr, arena.literal_base() + 4);
        assert_eq!(arena.slice(first.ptr, 4).unwrap(), b"abc\0");
        assert_eq!(second.len, 2);
    }

    #[test]
    fn full_pool_is_an_error() {
        let mut arena = arena(16);
        let mut pool = LiteralPool::new(&arena);
        pool.intern(&mut arena, b"0123456789").unwrap();
        assert_eq!(
            pool.intern(&mut arena, b"abcdef"),
            Err(CompileError::LiteralSectionExhausted { len: 7, remaining: 5 })
        );
    }
}
