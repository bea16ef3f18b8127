use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::client::Hs1xxClientError;

/// Initial key of the autokey XOR cipher used by the smart-home protocol.
pub const INITIAL_KEY: u8 = 171;

/// Largest reply frame we accept from a device.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Each ciphertext byte becomes the key for the next plaintext byte.
pub fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    plain
        .iter()
        .map(|b| {
            key ^= b;
            key
        })
        .collect()
}

pub fn decrypt(cipher: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    cipher
        .iter()
        .map(|b| {
            let plain = key ^ b;
            key = *b;
            plain
        })
        .collect()
}

/// Writes one length-prefixed encrypted frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), Hs1xxClientError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| Hs1xxClientError::FrameTooLarge(payload.len()))?;
    let frame = [len.to_be_bytes().to_vec(), encrypt(payload)].concat();
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame and returns the decrypted payload.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, Hs1xxClientError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(Hs1xxClientError::FrameTooLarge(len));
    }
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf).await?;
    Ok(decrypt(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_known_vector() {
        // Opening bytes of every request the Kasa app sends
        let encrypted = encrypt(br#"{"system""#);
        assert_eq!(encrypted, vec![0xd0, 0xf2, 0x81, 0xf8, 0x8b, 0xff, 0x9a, 0xf7, 0xd5]);
    }

    #[test]
    fn test_decrypt_reverses_encrypt() {
        let plain = br#"{"system":{"set_relay_state":{"state":1}}}"#;
        assert_eq!(decrypt(&encrypt(plain)), plain.to_vec());
    }

    #[test]
    fn test_empty_payload() {
        assert!(encrypt(&[]).is_empty());
        assert!(decrypt(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_frame_has_big_endian_length_prefix() {
        let mut out: Vec<u8> = vec![];
        write_frame(&mut out, b"abc").await.unwrap();
        assert_eq!(&out[..4], &[0, 0, 0, 3]);
        assert_eq!(decrypt(&out[4..]), b"abc".to_vec());

        let mut reader = out.as_slice();
        let payload = read_frame(&mut reader).await.unwrap();
        assert_eq!(payload, b"abc".to_vec());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversize_length() {
        let header = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        let mut reader = &header[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, Hs1xxClientError::FrameTooLarge(_)));
    }

    #[tokio::test]
    async fn test_read_frame_truncated_body_is_io_error() {
        let mut data = 10u32.to_be_bytes().to_vec();
        data.extend_from_slice(&[1, 2, 3]);
        let mut reader = data.as_slice();
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, Hs1xxClientError::Io(_)));
    }
}
