use crate::constants::EncryptionType;
use crate::error::KrbError;
use crate::keytab::KeyBlock;
use tracing::error;

// enctype (be32) || master kvno (be32)
const MASTER_KEY_TRAILER_LEN: usize = 8;

/// Key material as held by the database. A key that is still sealed under a master
/// key keeps its real enctype and the master key's kvno beside the sealed bytes.
#[derive(Clone, PartialEq, Eq)]
pub enum StoredKey {
    Plain {
        enctype: i32,
        key: Vec<u8>,
    },
    MasterKeyWrapped {
        true_enctype: i32,
        master_kvno: u32,
        key: Vec<u8>,
    },
}

impl std::fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        match self {
            StoredKey::Plain { enctype, key } => f
                .debug_struct("Plain")
                .field("enctype", enctype)
                .field("key_len", &key.len())
                .finish(),
            StoredKey::MasterKeyWrapped {
                true_enctype,
                master_kvno,
                key,
            } => f
                .debug_struct("MasterKeyWrapped")
                .field("true_enctype", true_enctype)
                .field("master_kvno", master_kvno)
                .field("key_len", &key.len())
                .finish(),
        }
    }
}

impl StoredKey {
    pub fn new(enctype: i32, key: Vec<u8>, master_kvno: Option<u32>) -> Self {
        match master_kvno {
            Some(master_kvno) => StoredKey::MasterKeyWrapped {
                true_enctype: enctype,
                master_kvno,
                key,
            },
            None => StoredKey::Plain { enctype, key },
        }
    }

    /// Flatten into the key block that is written to the keytab. Sealed keys are
    /// stored under the NULL enctype with the real enctype and master kvno appended
    /// to the key bytes, so that a reader which knows the master key can unseal them.
    pub fn to_key_block(&self) -> Result<KeyBlock, KrbError> {
        let (enctype, value) = match self {
            StoredKey::Plain { enctype, key } => (*enctype, key.clone()),
            StoredKey::MasterKeyWrapped {
                true_enctype,
                master_kvno,
                key,
            } => {
                let mut value = Vec::with_capacity(key.len() + MASTER_KEY_TRAILER_LEN);
                value.extend_from_slice(key);
                value.extend_from_slice(&(*true_enctype as u32).to_be_bytes());
                value.extend_from_slice(&master_kvno.to_be_bytes());
                (EncryptionType::NULL.into(), value)
            }
        };

        // Enctypes are 16 bit on disk, and Heimdal does have negative (private) ones.
        if i16::try_from(enctype).is_err() {
            error!(enctype, "enctype does not fit a keytab record");
            return Err(KrbError::InvalidEncryptionType);
        }

        // The keytab stores key lengths as a u16.
        if value.len() > u16::MAX as usize {
            error!(key_len = value.len(), "key block is too large for a keytab");
            return Err(KrbError::KeyBlockTooLarge);
        }

        Ok(KeyBlock { enctype, value })
    }

    /// Inverse of `to_key_block`. A NULL enctype block with room for the trailer is
    /// treated as sealed, anything else is a plain key.
    pub fn from_key_block(kb: &KeyBlock) -> Self {
        let sealed = kb.enctype == i32::from(EncryptionType::NULL);
        if sealed && kb.value.len() >= MASTER_KEY_TRAILER_LEN {
            let split = kb.value.len() - MASTER_KEY_TRAILER_LEN;
            let (key, trailer) = kb.value.split_at(split);
            let mut enctype = [0u8; 4];
            let mut mkvno = [0u8; 4];
            enctype.copy_from_slice(&trailer[..4]);
            mkvno.copy_from_slice(&trailer[4..]);
            StoredKey::MasterKeyWrapped {
                true_enctype: u32::from_be_bytes(enctype) as i32,
                master_kvno: u32::from_be_bytes(mkvno),
                key: key.to_vec(),
            }
        } else {
            StoredKey::Plain {
                enctype: kb.enctype,
                key: kb.value.clone(),
            }
        }
    }
}
