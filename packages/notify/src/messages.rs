//! User-facing alert texts (Telegram HTML, Polish).

use skyguard_threat_models::ThreatType;

/// Localized label with emoji for a threat type.
#[must_use]
pub const fn threat_label(threat_type: ThreatType) -> &'static str {
    match threat_type {
        ThreatType::Drone => "🛸 DRON",
        ThreatType::Rocket => "🚀 RAKIETA",
        ThreatType::Plane => "✈️ SAMOLOT",
        ThreatType::Helicopter => "🚁 ŚMIGŁOWIEC",
        ThreatType::Explosion => "💥 WYBUCH",
        ThreatType::Other => "⚠️ ZAGROŻENIE",
    }
}

/// Alert sent to a user `distance_km` away from a confirmed incident.
#[must_use]
pub fn threat_alert(threat_type: ThreatType, title: &str, distance_km: f64) -> String {
    format!(
        "🚨 <b>ZAGROŻENIE Z POWIETRZA!</b> 🚨\n\n\
         Typ: {}\n\
         Odległość: {distance_km:.1} km od Twojej lokalizacji\n\
         Opis: {title}\n\n\
         ⚠️ Szukaj najbliższego schronienia!",
        threat_label(threat_type)
    )
}

/// Broadcast once no confirmed incident remains.
#[must_use]
pub const fn all_clear() -> &'static str {
    "✅ <b>ALARM ODWOŁANY</b> ✅\n\n\
     Wszystkie zagrożenia zostały usunięte.\n\
     Możesz bezpiecznie kontynuować swoje zajęcia.\n\n\
     🛡️ Dziękujemy za korzystanie z SkyGuard!"
}
