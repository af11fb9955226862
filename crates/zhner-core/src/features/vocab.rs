//! Character vocabulary backed by a Hugging Face tokenizer file.

use std::path::Path;

use tokenizers::Tokenizer;
use tokenizers::models::wordpiece::WordPiece;
use tracing::info;

use crate::error::{Result, ZhnerError};

pub const PAD: &str = "[PAD]";
pub const UNK: &str = "[UNK]";
pub const CLS: &str = "[CLS]";
pub const SEP: &str = "[SEP]";
pub const MASK: &str = "[MASK]";

/// Maps single characters to vocabulary ids.
///
/// Chinese BERT vocabularies hold one entry per character, so lookup is
/// per character rather than through the tokenizer's word splitting; this
/// keeps one id per labelled character.
pub struct CharVocab {
    tokenizer: Tokenizer,
    pad_id: u32,
    unk_id: u32,
    cls_id: u32,
    sep_id: u32,
    mask_id: u32,
}

impl CharVocab {
    /// Load `tokenizer.json`, or a BERT `vocab.txt` (one token per line).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = if path.extension().is_some_and(|e| e == "json") {
            Tokenizer::from_file(path).map_err(|e| ZhnerError::Tokenizer(e.to_string()))?
        } else {
            let vocab = path.to_str().ok_or_else(|| {
                ZhnerError::Tokenizer(format!("non UTF-8 vocabulary path {}", path.display()))
            })?;
            let model = WordPiece::from_file(vocab)
                .unk_token(UNK.to_string())
                .build()
                .map_err(|e| ZhnerError::Tokenizer(e.to_string()))?;
            Tokenizer::new(model)
        };
        let vocab = Self::from_tokenizer(tokenizer)?;
        info!(path = %path.display(), size = vocab.vocab_size(), "vocabulary loaded");
        Ok(vocab)
    }

    /// Wrap a tokenizer that defines every special token.
    pub fn from_tokenizer(tokenizer: Tokenizer) -> Result<Self> {
        let special = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| ZhnerError::Tokenizer(format!("vocabulary lacks {token}")))
        };
        Ok(Self {
            pad_id: special(PAD)?,
            unk_id: special(UNK)?,
            cls_id: special(CLS)?,
            sep_id: special(SEP)?,
            mask_id: special(MASK)?,
            tokenizer,
        })
    }

    pub fn token_id(&self, c: char) -> u32 {
        let mut buf = [0u8; 4];
        self.tokenizer
            .token_to_id(c.encode_utf8(&mut buf))
            .unwrap_or(self.unk_id)
    }

    pub fn encode(&self, chars: &[char]) -> Vec<u32> {
        chars.iter().map(|&c| self.token_id(c)).collect()
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    pub fn cls_id(&self) -> u32 {
        self.cls_id
    }

    pub fn sep_id(&self) -> u32 {
        self.sep_id
    }

    pub fn mask_id(&self) -> u32 {
        self.mask_id
    }

    /// Whether `id` is one of the special tokens.
    pub fn is_special(&self, id: u32) -> bool {
        [self.pad_id, self.unk_id, self.cls_id, self.sep_id, self.mask_id].contains(&id)
    }
}
