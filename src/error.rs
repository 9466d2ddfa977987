#[derive(Debug)]
pub enum KrbError {
    // IMPORTANT: Don't add values to the unit variants of this enum - it's a potential
    // security risk as you can leak key material in an error. If you want to debug the
    // error, then use the error! macro at the error raise site to report relevant
    // information.
    PrincipalNameInvalid,
    PrincipalNameInvalidType,
    PrincipalPatternInvalid,

    UnsupportedKeytabType,
    KeytabOpen,
    KeytabRead,
    KeytabWrite,
    KeytabInvalidVersion,

    KeyBlockTooLarge,
    InvalidEncryptionType,

    DatabaseOpen,
    DatabaseScan,

    ConfigInvalid,

    /// No really, do you have a time machine? How did you go back to before 1970?
    DoYouHaveATimeMachine,
}
