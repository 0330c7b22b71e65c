//! Per-direction packet cipher.
//!
//! Each direction owns one Shannon stream cipher keyed with its 32-byte key
//! window from the handshake key block. Before every packet the cipher is
//! re-nonced with a 32-bit counter that both ends track implicitly; the counter
//! advances exactly once per packet, success or not.
//!
//! Wire format produced/consumed by the framing codec:
//!   [ u16 length (plain) | ciphertext(command || payload) | MAC (4 bytes) ]

use shannon::Shannon;

use crate::error::CryptoError;

pub const MAC_SIZE: usize = 4;

pub struct PacketCipher {
    cipher: Shannon,
    nonce: u32,
}

impl PacketCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Shannon::new(key),
            nonce: 0,
        }
    }

    /// Number of packets processed so far in this direction.
    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    fn next_nonce(&mut self) {
        self.cipher.nonce_u32(self.nonce);
        self.nonce = self.nonce.wrapping_add(1);
    }

    /// Encrypt `buf` in place and return the packet MAC.
    pub fn seal(&mut self, buf: &mut [u8]) -> [u8; MAC_SIZE] {
        self.next_nonce();
        self.cipher.encrypt(buf);
        let mut mac = [0u8; MAC_SIZE];
        self.cipher.finish(&mut mac);
        mac
    }

    /// Decrypt `buf` in place and check `mac`. A mismatch means the connection
    /// can no longer be trusted.
    pub fn open(&mut self, buf: &mut [u8], mac: &[u8]) -> Result<(), CryptoError> {
        self.next_nonce();
        self.cipher.decrypt(buf);
        self.cipher
            .check_mac(mac)
            .map_err(|_| CryptoError::MacMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_pair() {
        let key = [0x42u8; 32];
        let mut tx = PacketCipher::new(&key);
        let mut rx = PacketCipher::new(&key);

        for msg in [&b"first"[..], &b""[..], &b"third packet"[..]] {
            let mut buf = msg.to_vec();
            let mac = tx.seal(&mut buf);
            rx.open(&mut buf, &mac).unwrap();
            assert_eq!(buf, msg);
        }
        assert_eq!(tx.nonce(), 3);
        assert_eq!(rx.nonce(), 3);
    }

    #[test]
    fn flipped_mac_is_rejected() {
        let key = [1u8; 32];
        let mut tx = PacketCipher::new(&key);
        let mut rx = PacketCipher::new(&key);
        let mut buf = b"payload".to_vec();
        let mut mac = tx.seal(&mut buf);
        mac[0] ^= 0xff;
        assert!(matches!(rx.open(&mut buf, &mac), Err(CryptoError::MacMismatch)));
    }

    #[test]
    fn out_of_step_nonce_is_rejected() {
        let key = [5u8; 32];
        let mut tx = PacketCipher::new(&key);
        let mut rx = PacketCipher::new(&key);
        let mut skipped = b"a".to_vec();
        tx.seal(&mut skipped);
        let mut buf = b"b".to_vec();
        let mac = tx.seal(&mut buf);
        assert!(rx.open(&mut buf, &mac).is_err());
    }
}
